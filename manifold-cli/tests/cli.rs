//! Checks on the pieces the binary delegates to: the format switch and
//! the controller-info wire shape.

use clap::Parser;

use manifold_cli::docs::ControllerInfoDoc;
use manifold_cli::output::Format;

#[derive(Parser)]
struct FormatProbe {
    #[arg(long, value_enum, default_value = "yaml")]
    format: Format,
}

#[test]
fn format_defaults_to_yaml() {
    let probe = FormatProbe::try_parse_from(["probe"]).unwrap();
    assert_eq!(probe.format, Format::Yaml);
    let probe = FormatProbe::try_parse_from(["probe", "--format", "json"]).unwrap();
    assert_eq!(probe.format, Format::Json);
    let probe = FormatProbe::try_parse_from(["probe", "--format", "tabular"]).unwrap();
    assert_eq!(probe.format, Format::Tabular);
    assert!(FormatProbe::try_parse_from(["probe", "--format", "xml"]).is_err());
}

#[test]
fn controller_info_matches_the_add_controller_wire_shape() {
    // The YAML document and the RPC params are the same JSON object.
    let doc = ControllerInfoDoc {
        name: "alpha".to_string(),
        public_address: "alpha.example.com:17070".to_string(),
        username: "admin".to_string(),
        password: "hunter2".to_string(),
        ..Default::default()
    };
    let wire = serde_json::to_value(&doc).unwrap();
    assert_eq!(wire["name"], "alpha");
    assert_eq!(wire["public-address"], "alpha.example.com:17070");
    assert!(wire.get("ca-certificate").is_none());
    assert!(wire.get("api-addresses").is_some());
}
