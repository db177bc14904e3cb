//! The controller-info document: the YAML an administrator feeds to
//! `add-controller`, and that `write-controller-info` emits.

use serde::{Deserialize, Serialize};

use manifold_core::{Error, Result};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerInfoDoc {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(rename = "public-address", default, skip_serializing_if = "String::is_empty")]
    pub public_address: String,
    #[serde(rename = "api-addresses", default)]
    pub api_addresses: Vec<String>,
    /// Omitted when a public address with a real certificate is used.
    #[serde(rename = "ca-certificate", default, skip_serializing_if = "String::is_empty")]
    pub ca_certificate: String,
    pub username: String,
    pub password: String,
    #[serde(rename = "tls-hostname", default, skip_serializing_if = "String::is_empty")]
    pub tls_hostname: String,
}

impl ControllerInfoDoc {
    pub fn from_yaml(raw: &str) -> Result<Self> {
        serde_yaml::from_str(raw)
            .map_err(|e| Error::bad_request(format!("parse controller info: {e}")))
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::unspecified(format!("encode controller info: {e}")))
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::bad_request("controller info needs a name"));
        }
        if self.public_address.is_empty() && self.api_addresses.is_empty() {
            return Err(Error::bad_request("controller info needs at least one address"));
        }
        if self.username.is_empty() || self.password.is_empty() {
            return Err(Error::bad_request("controller info needs admin credentials"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yaml_round_trips() {
        let doc = ControllerInfoDoc {
            name: "alpha".to_string(),
            uuid: "2e5f9a3e-5aed-4fbf-8a3c-4b83177bcfb4".to_string(),
            public_address: "alpha.example.com:17070".to_string(),
            api_addresses: vec!["10.0.0.1:17070".to_string(), "10.0.0.2:17070".to_string()],
            ca_certificate: String::new(),
            username: "admin".to_string(),
            password: "hunter2".to_string(),
            tls_hostname: "alpha.example.com".to_string(),
        };
        let yaml = doc.to_yaml().unwrap();
        // CA omitted when a public address is used.
        assert!(!yaml.contains("ca-certificate"));
        let parsed = ControllerInfoDoc::from_yaml(&yaml).unwrap();
        assert_eq!(parsed, doc);
    }

    #[test]
    fn incomplete_documents_are_rejected() {
        let doc = ControllerInfoDoc {
            name: "alpha".to_string(),
            ..Default::default()
        };
        assert!(doc.validate().is_err());
    }
}
