use tollgate_core::IdentityId;

/// Who a request is, as resolved by the session middleware.
///
/// Always present in request extensions on routes behind the middleware.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RequestIdentity {
    Authenticated(IdentityId),
    Anonymous,
}

impl RequestIdentity {
    pub fn identity(&self) -> Option<IdentityId> {
        match self {
            RequestIdentity::Authenticated(id) => Some(*id),
            RequestIdentity::Anonymous => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, RequestIdentity::Authenticated(_))
    }
}
