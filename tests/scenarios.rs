use anyhow::Context;
use request_approval::{
    approver::{ApprovalConfig, ApproverSpec},
    config::ServiceConfig,
    lifecycle::RequestState,
    repository::{RequestRepository, SledRequestRepository, StoreError},
    service::{RequestService, ServiceError},
    template::{FieldKind, FieldValue, FormData, FormField, FormTemplate},
    trail::Decision,
};

use tempfile::tempdir; // Use for test db cleanup.

fn access_pass_template(approval: ApprovalConfig) -> FormTemplate {
    FormTemplate::new("tpl-access", "Site access pass", approval)
        .with_field(FormField::required("visitor", "Visitor", FieldKind::Text))
        .with_field(FormField::section(
            "Sign-off",
            vec![FormField::required("signature", "Signature", FieldKind::Signature)],
        ))
}

fn filled_form() -> FormData {
    FormData::new()
        .with("visitor", FieldValue::Text("Sam Doe".into()))
        .with("signature", FieldValue::Flag(true))
}

fn sequential_chain() -> ApprovalConfig {
    ApprovalConfig::sequential()
        .with_approver(ApproverSpec::new("security", "sec-officer", 1))
        .with_approver(ApproverSpec::new("facilities", "fac-manager", 2).delegatable())
}

// Each test opens its own store in a temp dir: sled locks the files it uses.
fn sled_service(dir: &std::path::Path) -> anyhow::Result<RequestService<SledRequestRepository>> {
    let config = ServiceConfig::from_toml_str(&format!(
        "[store]\npath = {:?}\n\n[cancel]\nadministrators = [\"ops\"]\n",
        dir.join("requests.db")
    ))?;
    RequestService::open(config)
}

#[test]
fn submit_and_approve_sequentially() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = sled_service(temp_dir.path())?;
    let template = access_pass_template(sequential_chain());

    let draft = service.create_draft(&template, "rita", "Visit on Monday", filled_form())?;
    let ctx = service
        .submit(draft.id(), &template)
        .context("Request Failed on Submit: ")?;
    assert_eq!(ctx.state(), RequestState::Pending);

    let ctx = service
        .record_action(ctx.id(), "sec-officer", Decision::Approved, Some("badge printed".into()), true)
        .context("Request Failed on first approval: ")?;
    assert_eq!(ctx.state(), RequestState::Pending);
    assert_eq!(ctx.pending_approvers()?[0].id, "facilities");

    let ctx = service.record_action(ctx.id(), "fac-manager", Decision::Approved, None, true)?;
    assert_eq!(ctx.state(), RequestState::Approved);
    assert!(ctx.completed_at().is_some());

    // the stored copy agrees
    let stored = service.get(ctx.id())?;
    assert_eq!(stored, ctx);

    Ok(())
}

#[test]
fn required_rejection_closes_the_request() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = sled_service(temp_dir.path())?;
    let template = access_pass_template(sequential_chain());

    let draft = service.create_draft(&template, "rita", "Visit", filled_form())?;
    let ctx = service.submit(draft.id(), &template)?;
    let ctx = service.record_action(ctx.id(), "sec-officer", Decision::Rejected, Some("no escort".into()), false)?;

    assert_eq!(ctx.state(), RequestState::Rejected);
    assert!(service.pending_for("fac-manager")?.is_empty());

    let late = service.record_action(ctx.id(), "fac-manager", Decision::Approved, None, false);
    assert!(matches!(late, Err(ServiceError::Workflow(_))));
    assert_eq!(service.get(ctx.id())?.trail().len(), 1);

    Ok(())
}

#[test]
fn any_one_approver_clears_it() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = sled_service(temp_dir.path())?;
    let template = access_pass_template(
        ApprovalConfig::any_one()
            .with_approver(ApproverSpec::new("desk-a", "reception-a", 1).optional())
            .with_approver(ApproverSpec::new("desk-b", "reception-b", 2).optional()),
    );

    let draft = service.create_draft(&template, "rita", "Visit", filled_form())?;
    service.submit(draft.id(), &template)?;

    assert_eq!(service.pending_for("reception-a")?.len(), 1);
    assert_eq!(service.pending_for("reception-b")?.len(), 1);

    let ctx = service.record_action(draft.id(), "reception-a", Decision::Rejected, None, false)?;
    assert_eq!(ctx.state(), RequestState::Pending);

    let ctx = service.record_action(draft.id(), "reception-b", Decision::Approved, None, false)?;
    assert_eq!(ctx.state(), RequestState::Approved);

    Ok(())
}

#[test]
fn delegated_slot_is_acted_on_by_the_delegate() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = sled_service(temp_dir.path())?;
    let template = access_pass_template(sequential_chain());

    let draft = service.create_draft(&template, "rita", "Visit", filled_form())?;
    service.submit(draft.id(), &template)?;
    service.record_action(draft.id(), "sec-officer", Decision::Approved, None, true)?;

    let ctx = service.delegate(draft.id(), "facilities", "fac-manager", "fac-deputy")?;
    assert_eq!(ctx.delegations().len(), 1);
    assert_eq!(service.pending_for("fac-deputy")?.len(), 1);
    assert!(service.pending_for("fac-manager")?.is_empty());

    let ctx = service.record_action(draft.id(), "fac-deputy", Decision::Approved, None, true)?;
    assert_eq!(ctx.state(), RequestState::Approved);

    Ok(())
}

#[test]
fn administrators_may_cancel() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = sled_service(temp_dir.path())?;
    let template = access_pass_template(sequential_chain());

    let draft = service.create_draft(&template, "rita", "Visit", filled_form())?;
    service.submit(draft.id(), &template)?;

    assert!(matches!(
        service.cancel(draft.id(), "sec-officer", "not my call"),
        Err(ServiceError::Workflow(_))
    ));

    let ctx = service.cancel(draft.id(), "ops", "site closed")?;
    assert_eq!(ctx.state(), RequestState::Cancelled);
    assert_eq!(ctx.cancellation().map(|c| c.actor_id.as_str()), Some("ops"));

    Ok(())
}

#[test]
fn racing_approvers_cannot_both_land() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let db = sled::open(temp_dir.path().join("race.db"))?;
    let service = RequestService::new(SledRequestRepository::open(&db)?, ServiceConfig::default());
    let other_writer = SledRequestRepository::open(&db)?;
    let template = access_pass_template(
        ApprovalConfig::any_one()
            .with_approver(ApproverSpec::new("desk-a", "reception-a", 1))
            .with_approver(ApproverSpec::new("desk-b", "reception-b", 2)),
    );

    let draft = service.create_draft(&template, "rita", "Visit", filled_form())?;
    service.submit(draft.id(), &template)?;

    // the second writer read the request before the first approval landed
    let stale = service.get(draft.id())?;
    service.record_action(draft.id(), "reception-a", Decision::Approved, None, false)?;

    let late = stale.record_action("reception-b", Decision::Approved, None, false)?;
    assert!(matches!(
        other_writer.save(&late),
        Err(StoreError::Conflict { .. })
    ));

    let stored = service.get(draft.id())?;
    assert_eq!(stored.trail().len(), 1);
    assert_eq!(stored.trail().entries()[0].actor_id, "reception-a");

    Ok(())
}

#[test]
fn view_history() -> anyhow::Result<()> {
    let temp_dir = tempdir()?;
    let service = sled_service(temp_dir.path())?;
    let template = access_pass_template(
        ApprovalConfig::sequential()
            .with_approver(ApproverSpec::new("triage", "triage-desk", 1).optional())
            .with_approver(ApproverSpec::new("security", "sec-officer", 2))
            .with_approver(ApproverSpec::new("facilities", "fac-manager", 3)),
    );

    let draft = service.create_draft(&template, "rita", "Visit", filled_form())?;
    service.submit(draft.id(), &template)?;
    service.record_action(draft.id(), "triage-desk", Decision::Skipped, None, false)?;
    service.record_action(draft.id(), "sec-officer", Decision::Approved, Some("ok".into()), true)?;
    service.record_action(draft.id(), "fac-manager", Decision::Approved, None, true)?;

    let history = service.history(draft.id())?;
    let slots: Vec<&str> = history.iter().map(|a| a.approver_spec_id.as_str()).collect();
    assert_eq!(slots, vec!["triage", "security", "facilities"]);
    assert_eq!(history[0].decision, Decision::Skipped);
    assert!(history.windows(2).all(|w| w[0].acted_at <= w[1].acted_at));

    assert_eq!(service.list(Some(RequestState::Approved))?.len(), 1);

    Ok(())
}
