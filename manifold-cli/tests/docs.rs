//! Controller-info document round trips.

use manifold_cli::docs::ControllerInfoDoc;

#[test]
fn local_document_keeps_its_ca() {
    let doc = ControllerInfoDoc {
        name: "alpha".to_string(),
        api_addresses: vec!["10.0.0.1:17070".to_string()],
        ca_certificate: "-----BEGIN CERTIFICATE-----\nabc\n-----END CERTIFICATE-----\n"
            .to_string(),
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        ..Default::default()
    };
    doc.validate().unwrap();
    let yaml = doc.to_yaml().unwrap();
    assert!(yaml.contains("ca-certificate"));
    assert_eq!(ControllerInfoDoc::from_yaml(&yaml).unwrap(), doc);
}

#[test]
fn hand_written_documents_parse() {
    let yaml = r#"
name: beta
uuid: 4bcb578c-5ab5-44a6-9174-0b64f2b5b4b4
public-address: beta.example.com:443
api-addresses:
  - 10.1.0.1:17070
  - 10.1.0.2:17070
username: admin
password: correct-horse
tls-hostname: beta.example.com
"#;
    let doc = ControllerInfoDoc::from_yaml(yaml).unwrap();
    doc.validate().unwrap();
    assert_eq!(doc.name, "beta");
    assert_eq!(doc.api_addresses.len(), 2);
    assert!(doc.ca_certificate.is_empty());
}
