//! Principal extraction for incoming requests.
//!
//! Authentication itself happens upstream; this module only reads the
//! identity the authenticating proxy attached to the request.
use crate::types::Principal;
use axum::http::HeaderMap;

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

/// Resolves the authenticated caller of a request, if any.
pub trait PrincipalResolver: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Option<Principal>;
}

/// Trusts the `x-principal-id` and `x-principal-role` headers set by a
/// reverse proxy. Only safe when the service is not reachable directly.
#[derive(Debug, Clone, Default)]
pub struct HeaderPrincipalResolver {
    /// Principal treated as admin regardless of the role header.
    admin_principal: Option<String>,
}

impl HeaderPrincipalResolver {
    pub fn new(admin_principal: Option<String>) -> Self {
        Self { admin_principal }
    }
}

impl PrincipalResolver for HeaderPrincipalResolver {
    fn resolve(&self, headers: &HeaderMap) -> Option<Principal> {
        let id = headers
            .get(PRINCIPAL_ID_HEADER)?
            .to_str()
            .ok()?
            .trim()
            .to_string();
        if id.is_empty() {
            return None;
        }

        let role_header = headers
            .get(PRINCIPAL_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_ascii_lowercase());

        let is_admin = role_header.as_deref() == Some("admin")
            || self.admin_principal.as_deref() == Some(id.as_str());

        Some(if is_admin {
            Principal::admin(id)
        } else {
            Principal::user(id)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn missing_or_blank_id_is_anonymous() {
        let resolver = HeaderPrincipalResolver::default();
        assert_eq!(resolver.resolve(&HeaderMap::new()), None);
        assert_eq!(resolver.resolve(&headers(&[(PRINCIPAL_ID_HEADER, "  ")])), None);
    }

    #[test]
    fn role_header_selects_admin() {
        let resolver = HeaderPrincipalResolver::default();
        assert_eq!(
            resolver.resolve(&headers(&[(PRINCIPAL_ID_HEADER, "bob"), (PRINCIPAL_ROLE_HEADER, "Admin")])),
            Some(Principal::admin("bob"))
        );
        assert_eq!(
            resolver.resolve(&headers(&[(PRINCIPAL_ID_HEADER, "alice"), (PRINCIPAL_ROLE_HEADER, "user")])),
            Some(Principal::user("alice"))
        );
        assert_eq!(
            resolver.resolve(&headers(&[(PRINCIPAL_ID_HEADER, "alice")])),
            Some(Principal::user("alice"))
        );
    }

    #[test]
    fn configured_admin_is_always_admin() {
        let resolver = HeaderPrincipalResolver::new(Some("root".into()));
        assert_eq!(
            resolver.resolve(&headers(&[(PRINCIPAL_ID_HEADER, "root")])),
            Some(Principal::admin("root"))
        );
    }
}
