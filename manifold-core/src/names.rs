//! Principal and resource name grammar.
//!
//! External user principals look like email addresses (`alice@example.com`);
//! service accounts end in `@serviceaccount`; a bare name with no `@` is a
//! controller-local user and is rejected in every external flow.

use sha2::{Digest, Sha256};

/// Domain suffix that marks a principal as a service account.
pub const SERVICEACCOUNT_DOMAIN: &str = "serviceaccount";

/// Cloud names reserved for public clouds; rejected at creation.
pub const RESERVED_CLOUD_NAMES: [&str; 16] = [
    "aks",
    "aws",
    "aws-china",
    "aws-gov",
    "azure",
    "azure-china",
    "cloudsigma",
    "ecs",
    "eks",
    "google",
    "joyent",
    "localhost",
    "oracle",
    "oracle-classic",
    "oracle-compute",
    "rackspace",
];

/// Returns true when `name` is reserved for a public cloud.
pub fn is_reserved_cloud_name(name: &str) -> bool {
    RESERVED_CLOUD_NAMES.contains(&name)
}

/// Returns true when the principal refers to an external identity.
///
/// Local (controller-only) users carry no `@` and are rejected everywhere
/// the management plane deals with identities.
pub fn is_external_principal(name: &str) -> bool {
    name.contains('@')
}

/// Returns true when the principal is a service account.
pub fn is_service_account(name: &str) -> bool {
    name.strip_suffix(SERVICEACCOUNT_DOMAIN)
        .and_then(|rest| rest.strip_suffix('@'))
        .is_some_and(|id| !id.is_empty())
}

fn is_valid_local_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '+' | '-' | '_')
}

fn is_valid_domain_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Validates the local part of a principal: allowed characters only, no
/// `--`, and no leading or trailing `-`.
pub fn is_valid_local_part(local: &str) -> bool {
    !local.is_empty()
        && local.chars().all(is_valid_local_char)
        && !local.contains("--")
        && !local.starts_with('-')
        && !local.ends_with('-')
}

/// Validates a full principal of the form `local@domain`.
pub fn is_valid_principal(name: &str) -> bool {
    match name.split_once('@') {
        Some((local, domain)) => {
            is_valid_local_part(local)
                && !domain.is_empty()
                && domain.chars().all(is_valid_domain_char)
        }
        None => false,
    }
}

/// Validates a service-account client id: a UUID or slug with no `@`.
pub fn is_valid_client_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Appends `@serviceaccount` unless the id already carries it.
pub fn ensure_serviceaccount_suffix(id: &str) -> String {
    if is_service_account(id) {
        id.to_string()
    } else {
        format!("{id}@{SERVICEACCOUNT_DOMAIN}")
    }
}

/// Derive the stored principal for an authenticated email.
///
/// When the local part already fits the grammar the email is used as-is.
/// Otherwise disallowed characters are substituted with `-`, runs of `-`
/// are collapsed, and the first six hex characters of a SHA-256 digest of
/// the original local part are appended, keeping the rewrite injective.
pub fn principal_from_email(email: &str) -> Option<String> {
    let (local, domain) = email.split_once('@')?;
    if local.is_empty() || domain.is_empty() || !domain.chars().all(is_valid_domain_char) {
        return None;
    }
    if is_valid_local_part(local) {
        return Some(email.to_string());
    }
    Some(format!("{}@{domain}", sanitise_local_part(local)))
}

fn sanitise_local_part(local: &str) -> String {
    let mut out = String::with_capacity(local.len() + 6);
    let mut last_dash = false;
    for c in local.chars() {
        let c = if is_valid_local_char(c) { c } else { '-' };
        if c == '-' {
            if last_dash {
                continue;
            }
            last_dash = true;
        } else {
            last_dash = false;
        }
        out.push(c);
    }
    let out = out.trim_matches('-').to_string();
    let digest = Sha256::digest(local.as_bytes());
    format!("{out}{:02x}{:02x}{:02x}", digest[0], digest[1], digest[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_email_is_kept() {
        assert_eq!(
            principal_from_email("alice@canonical.com").as_deref(),
            Some("alice@canonical.com")
        );
    }

    #[test]
    fn disallowed_characters_are_sanitised() {
        let got = principal_from_email("alice~wonder!land@example.com").unwrap();
        let (local, domain) = got.split_once('@').unwrap();
        assert_eq!(domain, "example.com");
        assert!(local.starts_with("alice-wonder-land"));
        // six hex characters appended
        let suffix = &local[local.len() - 6..];
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(is_valid_local_part(local), "sanitised local {local:?}");
    }

    #[test]
    fn sanitisation_is_injective_on_collisions() {
        let a = principal_from_email("a!b@example.com").unwrap();
        let b = principal_from_email("a~b@example.com").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn double_dash_is_rejected() {
        assert!(!is_valid_local_part("a--b"));
        assert!(is_valid_local_part("a-b"));
    }

    #[test]
    fn service_account_suffix() {
        assert!(is_service_account("1e654457-a195-4a41-8360-929c7f455d43@serviceaccount"));
        assert!(!is_service_account("alice@canonical.com"));
        assert!(!is_service_account("@serviceaccount"));
        assert_eq!(
            ensure_serviceaccount_suffix("my-svc"),
            "my-svc@serviceaccount"
        );
        assert_eq!(
            ensure_serviceaccount_suffix("my-svc@serviceaccount"),
            "my-svc@serviceaccount"
        );
    }

    #[test]
    fn local_users_are_not_external() {
        assert!(!is_external_principal("bob"));
        assert!(is_external_principal("bob@example.com"));
    }

    #[test]
    fn reserved_clouds() {
        assert!(is_reserved_cloud_name("aws"));
        assert!(!is_reserved_cloud_name("test-cloud"));
    }
}
