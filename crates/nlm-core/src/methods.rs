//! Remote method catalog.
//!
//! IDs are opaque strings assigned by the service; they change without
//! notice, which is what the health check exists to detect.

use std::fmt;

use nlm_rpc::MethodId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcMethod {
    ListNotebooks,
    CreateNotebook,
    GetNotebook,
    DeleteNotebook,
    AddSource,
    AddSourceFile,
    Summarize,
    CreateAudio,
    CreateVideo,
    CreateArtifact,
    ListArtifacts,
    PollResearch,
}

impl RpcMethod {
    pub const ALL: [RpcMethod; 12] = [
        RpcMethod::ListNotebooks,
        RpcMethod::CreateNotebook,
        RpcMethod::GetNotebook,
        RpcMethod::DeleteNotebook,
        RpcMethod::AddSource,
        RpcMethod::AddSourceFile,
        RpcMethod::Summarize,
        RpcMethod::CreateAudio,
        RpcMethod::CreateVideo,
        RpcMethod::CreateArtifact,
        RpcMethod::ListArtifacts,
        RpcMethod::PollResearch,
    ];

    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            RpcMethod::ListNotebooks => "wXbhsf",
            RpcMethod::CreateNotebook => "CCqFvf",
            RpcMethod::GetNotebook => "rLM1Ne",
            RpcMethod::DeleteNotebook => "WWINqb",
            RpcMethod::AddSource => "izAoDd",
            RpcMethod::AddSourceFile => "o4cbdc",
            RpcMethod::Summarize => "VfAZjd",
            RpcMethod::CreateAudio => "AHyHrd",
            RpcMethod::CreateVideo => "R7cb6c",
            RpcMethod::CreateArtifact => "xpWGLf",
            RpcMethod::ListArtifacts => "gArtLc",
            RpcMethod::PollResearch => "e3bVqc",
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            RpcMethod::ListNotebooks => "LIST_NOTEBOOKS",
            RpcMethod::CreateNotebook => "CREATE_NOTEBOOK",
            RpcMethod::GetNotebook => "GET_NOTEBOOK",
            RpcMethod::DeleteNotebook => "DELETE_NOTEBOOK",
            RpcMethod::AddSource => "ADD_SOURCE",
            RpcMethod::AddSourceFile => "ADD_SOURCE_FILE",
            RpcMethod::Summarize => "SUMMARIZE",
            RpcMethod::CreateAudio => "CREATE_AUDIO",
            RpcMethod::CreateVideo => "CREATE_VIDEO",
            RpcMethod::CreateArtifact => "CREATE_ARTIFACT",
            RpcMethod::ListArtifacts => "LIST_ARTIFACTS",
            RpcMethod::PollResearch => "POLL_RESEARCH",
        }
    }

    /// Look up a method by catalog name (`GET_NOTEBOOK`) or by raw ID.
    #[must_use]
    pub fn lookup(key: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| m.id() == key || m.name().eq_ignore_ascii_case(key))
    }
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

impl From<RpcMethod> for MethodId {
    fn from(method: RpcMethod) -> Self {
        MethodId::new(method.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique() {
        let ids: HashSet<&str> = RpcMethod::ALL.iter().map(|m| m.id()).collect();
        assert_eq!(ids.len(), RpcMethod::ALL.len());
    }

    #[test]
    fn test_lookup_by_name_or_id() {
        assert_eq!(RpcMethod::lookup("wXbhsf"), Some(RpcMethod::ListNotebooks));
        assert_eq!(RpcMethod::lookup("get_notebook"), Some(RpcMethod::GetNotebook));
        assert_eq!(RpcMethod::lookup("nope"), None);
    }

    #[test]
    fn test_into_method_id() {
        let id: MethodId = RpcMethod::PollResearch.into();
        assert_eq!(id.as_str(), "e3bVqc");
        assert_eq!(RpcMethod::ListArtifacts.to_string(), "LIST_ARTIFACTS (gArtLc)");
    }
}
