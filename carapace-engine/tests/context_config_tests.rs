//! TOML configuration of serialization contexts.

mod common;

use carapace_engine::{
    ClassWhitelist, ContextConfig, EncodingWhitelist, ErrorKind, SerializationContext, SerializationEncoding,
    SerializerFactory, UseCase, WhitelistMode,
};
use common::*;
use pretty_assertions::assert_eq;

#[test]
fn empty_config_matches_default_context() {
    let context = SerializationContext::from_toml_str("").unwrap();
    let default = SerializationContext::default();
    assert_eq!(context.object_references_enabled, default.object_references_enabled);
    assert_eq!(context.use_case, default.use_case);
    assert_eq!(context.prevent_data_loss, default.prevent_data_loss);
    assert_eq!(context.limits, default.limits);
    assert!(context.whitelist.has_listed("any.Type"));
    assert!(!context.encoding_whitelist.accepts(SerializationEncoding::Snappy));
}

#[test]
fn full_config_parses() {
    let config: ContextConfig = toml::from_str(
        r#"
object-references-enabled = false
use-case = "storage"
prevent-data-loss = true
accepted-encodings = ["snappy"]

[limits]
max-depth = 16

[whitelist]
mode = "allowlist"
allowed-prefixes = ["app."]
"#,
    )
    .unwrap();

    assert!(!config.object_references_enabled);
    assert_eq!(config.use_case, UseCase::Storage);
    assert_eq!(config.accepted_encodings, vec![SerializationEncoding::Snappy]);
    assert_eq!(config.limits.max_depth, 16);
    // Unset limits keep their defaults.
    assert_eq!(config.limits.max_schema_entries, 4096);
    assert_eq!(config.whitelist.as_ref().unwrap().mode, WhitelistMode::Allowlist);

    let context = config.into_context();
    assert!(context.prevent_data_loss);
    assert!(context.encoding_whitelist.accepts(SerializationEncoding::Snappy));
    assert!(!context.encoding_whitelist.accepts(SerializationEncoding::Deflate));
    assert!(context.whitelist.has_listed("app.Person"));
    assert!(!context.whitelist.has_listed("other.Person"));
}

#[test]
fn invalid_config_is_a_config_error() {
    let err = SerializationContext::from_toml_str("use-case = \"nonsense\"").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn load_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("carapace.toml");
    std::fs::write(&path, "use-case = \"p2p\"\n\n[limits]\nmax-depth = 2\n").unwrap();

    let context = SerializationContext::load_from(&path).unwrap();
    assert_eq!(context.use_case, UseCase::P2p);

    // A depth limit of two cannot hold a person's nested address fields.
    let factory = SerializerFactory::new();
    let err = factory.serialize(&alice(), &context).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DepthExceeded);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = SerializationContext::load_from(&dir.path().join("absent.toml")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn unsupported_preferred_version_falls_back() {
    let factory = SerializerFactory::new();
    let context = context().with_preferred_version(9);
    let bytes = factory.serialize(&Color::Red, &context).unwrap();
    assert_eq!(bytes.as_slice()[4], carapace_engine::envelope::CURRENT_VERSION);
    assert_eq!(factory.deserialize::<Color>(bytes.as_slice(), &context).unwrap(), Color::Red);
}

#[test]
fn untrusted_use_cases_start_closed() {
    let factory = SerializerFactory::new();
    let bytes = factory.serialize(&Color::Red, &context()).unwrap();

    for use_case in [UseCase::P2p, UseCase::RpcServer] {
        let context = SerializationContext::new(use_case);
        assert!(!context.whitelist.has_listed("app.Color"));
        let err = factory.deserialize::<Color>(bytes.as_slice(), &context).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WhitelistRejected);
    }

    for use_case in [UseCase::RpcClient, UseCase::Storage, UseCase::Checkpoint, UseCase::Testing] {
        let context = SerializationContext::new(use_case);
        assert_eq!(factory.deserialize::<Color>(bytes.as_slice(), &context).unwrap(), Color::Red);
    }
}

#[test]
fn untrusted_config_without_whitelist_table_is_closed() {
    let context = SerializationContext::from_toml_str("use-case = \"rpc-server\"").unwrap();
    assert!(!context.whitelist.has_listed("app.Color"));

    let context = SerializationContext::from_toml_str(
        "use-case = \"rpc-server\"\n\n[whitelist]\nmode = \"allowlist\"\nallowed-prefixes = [\"app.\"]\n",
    )
    .unwrap();
    assert!(context.whitelist.has_listed("app.Color"));
}
