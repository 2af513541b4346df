mod dirs;
mod settings;
mod validation;

pub use dirs::{Directories, HOME_ENV};
pub use settings::{BASE_URL_ENV, Config, PollProfile, PollProfiles};
pub use validation::warn_unknown_fields;
