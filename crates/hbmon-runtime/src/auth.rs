//! Role check for administrative operations.

use std::collections::HashSet;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} requires one of the moderator roles")]
pub struct AuthorizationDenied {
    pub operation: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct Authorizer {
    moderator_roles: HashSet<String>,
}

impl Authorizer {
    pub fn new(moderator_roles: impl IntoIterator<Item = String>) -> Self {
        Self {
            moderator_roles: moderator_roles.into_iter().collect(),
        }
    }

    /// Allow `operation` when the caller holds any moderator role.
    pub fn authorize(
        &self,
        operation: &'static str,
        caller_roles: &[String],
    ) -> Result<(), AuthorizationDenied> {
        if caller_roles
            .iter()
            .any(|role| self.moderator_roles.contains(role))
        {
            Ok(())
        } else {
            tracing::info!(operation, ?caller_roles, "authorization denied");
            Err(AuthorizationDenied { operation })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_moderator_role_is_enough() {
        let auth = Authorizer::new(["mods".to_string(), "admins".to_string()]);
        assert!(auth.authorize("confirm", &["guest".into(), "admins".into()]).is_ok());
    }

    #[test]
    fn missing_role_is_denied() {
        let auth = Authorizer::new(["mods".to_string()]);
        let err = auth.authorize("retire", &["guest".into()]).expect_err("denied");
        assert_eq!(err.to_string(), "retire requires one of the moderator roles");
        assert!(auth.authorize("retire", &[]).is_err());
    }

    #[test]
    fn empty_role_set_denies_everyone() {
        let auth = Authorizer::default();
        assert!(auth.authorize("confirm", &["mods".into()]).is_err());
    }
}
