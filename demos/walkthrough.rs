//! Walks one access-pass request through a two step approval chain against a
//! throwaway sled store.
//!
//!     RUST_LOG=debug cargo run --example walkthrough

use request_approval::{
    approver::{ApprovalConfig, ApproverSpec},
    config::ServiceConfig,
    service::RequestService,
    template::{FieldKind, FieldValue, FormData, FormField, FormTemplate},
    trail::Decision,
};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_toml_str(
        r#"
        log_level = "info"

        [store]
        temporary = true

        [cancel]
        administrators = ["ops"]
        "#,
    )?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let service = RequestService::open(config)?;

    let template = FormTemplate::new(
        "tpl-access",
        "Site access pass",
        ApprovalConfig::sequential()
            .with_approver(ApproverSpec::new("security", "sec-officer", 1))
            .with_approver(ApproverSpec::new("facilities", "fac-manager", 2).delegatable()),
    )
    .with_field(FormField::required("visitor", "Visitor", FieldKind::Text))
    .with_field(FormField::required("signature", "Signature", FieldKind::Signature));

    let form = FormData::new()
        .with("visitor", FieldValue::Text("Sam Doe".into()))
        .with("signature", FieldValue::Flag(true));

    let draft = service.create_draft(&template, "rita", "Visit on Monday", form)?;
    let id = draft.id().to_string();

    service.submit(&id, &template)?;

    // out of turn, refused
    if let Err(e) = service.record_action(&id, "fac-manager", Decision::Approved, None, true) {
        println!("refused: {e}");
    }

    service.record_action(&id, "sec-officer", Decision::Approved, Some("badge printed".into()), true)?;
    service.delegate(&id, "facilities", "fac-manager", "fac-deputy")?;
    let done = service.record_action(&id, "fac-deputy", Decision::Approved, None, true)?;

    println!("{} is {}", done.id(), done.state());
    for action in service.history(&id)? {
        println!(
            "  {} {:?} by {} at {}",
            action.approver_spec_id, action.decision, action.actor_id, action.acted_at
        );
    }
    println!("{}", serde_json::to_string_pretty(&done)?);

    Ok(())
}
