//! Service layer API for request workflow operations
use super::config::ServiceConfig;
use super::error::{ConfigurationError, WorkflowError};
use super::lifecycle::{Request, RequestLifecycle, RequestState};
use super::repository::{RequestRepository, SledRequestRepository, StoreError};
use super::template::{FieldError, FormData, FormTemplate};
use super::trail::{ApprovalAction, Decision};
use super::utils;
use anyhow::Context;
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum ServiceError {
    #[error("request `{0}` was not found")]
    NotFound(String),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("form has {} invalid field(s)", .0.len())]
    InvalidForm(Vec<FieldError>),
    #[error("request `{request}` was drafted from template `{expected}`, not `{given}`")]
    TemplateMismatch {
        request: String,
        expected: String,
        given: String,
    },
    #[error("could not allocate a request id: {0}")]
    Identifier(String),
}

impl From<ConfigurationError> for ServiceError {
    fn from(value: ConfigurationError) -> Self {
        ServiceError::Workflow(value.into())
    }
}

pub struct RequestService<R> {
    repository: R,
    config: ServiceConfig,
}

impl RequestService<SledRequestRepository> {
    /// Open (or create) the sled store described by `config`.
    pub fn open(config: ServiceConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let db = config
            .sled_config()
            .open()
            .with_context(|| format!("could not open store at `{}`", config.store.path.display()))?;
        let repository = SledRequestRepository::open(&db)?;
        info!(path = %config.store.path.display(), temporary = config.store.temporary, "request store opened");
        Ok(Self::new(repository, config))
    }
}

impl<R: RequestRepository> RequestService<R> {
    pub fn new(repository: R, config: ServiceConfig) -> Self {
        Self { repository, config }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Start a draft from `template`. Drafts may be incomplete, so the form is
    /// only checked on submit.
    pub fn create_draft(
        &self,
        template: &FormTemplate,
        requester_id: &str,
        title: &str,
        form_data: FormData,
    ) -> Result<RequestLifecycle, ServiceError> {
        template.validate()?;

        let request_id = utils::new_prefixed_id(&self.config.ids.request_prefix)
            .map_err(|e| ServiceError::Identifier(format!("{e:#}")))?;
        let request = Request::new(request_id.as_str(), title, requester_id, template.id.as_str())
            .with_form_data(form_data);
        let draft = RequestLifecycle::new(request, template.approval.clone());

        let saved = self.repository.save(&draft)?;
        info!(request_id = %saved.id(), template_id = %template.id, requester_id, "draft created");
        Ok(saved)
    }

    pub fn get(&self, request_id: &str) -> Result<RequestLifecycle, ServiceError> {
        // bech32 prefixes are case insensitive and always encode lowercase
        let ours = utils::id_prefix(request_id)
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(&self.config.ids.request_prefix));
        if !ours {
            return Err(ServiceError::NotFound(request_id.to_string()));
        }
        self.repository
            .get(request_id)?
            .ok_or_else(|| ServiceError::NotFound(request_id.to_string()))
    }

    pub fn list(&self, state: Option<RequestState>) -> Result<Vec<RequestLifecycle>, ServiceError> {
        let mut requests = self.repository.list()?;
        if let Some(state) = state {
            requests.retain(|request| request.state() == state);
        }
        Ok(requests)
    }

    pub fn edit_draft(
        &self,
        request_id: &str,
        form_data: FormData,
    ) -> Result<RequestLifecycle, ServiceError> {
        self.transition(request_id, "edit", |current| current.edit(form_data))
    }

    /// Check the form against the template's current shape, take the
    /// template's current approvers as the snapshot and move to pending.
    pub fn submit(
        &self,
        request_id: &str,
        template: &FormTemplate,
    ) -> Result<RequestLifecycle, ServiceError> {
        let current = self.get(request_id)?;
        if current.request().template_id != template.id {
            return Err(ServiceError::TemplateMismatch {
                request: request_id.to_string(),
                expected: current.request().template_id.clone(),
                given: template.id.clone(),
            });
        }
        template.validate()?;

        // the form is checked on the record being submitted, not the one above
        self.transition(request_id, "submit", |current| -> Result<_, ServiceError> {
            if current.state() != RequestState::Draft {
                return Ok(current.submit()?);
            }
            template
                .check(&current.request().form_data)
                .map_err(ServiceError::InvalidForm)?;
            Ok(current.replace_config(template.approval.clone())?.submit()?)
        })
    }

    pub fn record_action(
        &self,
        request_id: &str,
        approver_id: &str,
        decision: Decision,
        comment: Option<String>,
        signature_present: bool,
    ) -> Result<RequestLifecycle, ServiceError> {
        let updated = self.transition(request_id, "record_action", |current| {
            current.record_action(approver_id, decision, comment, signature_present)
        })?;

        if updated.is_terminal() {
            info!(request_id, state = %updated.state(), "approval chain resolved");
        }
        Ok(updated)
    }

    pub fn cancel(
        &self,
        request_id: &str,
        actor_id: &str,
        reason: &str,
    ) -> Result<RequestLifecycle, ServiceError> {
        let policy = &self.config.cancel;
        self.transition(request_id, "cancel", |current| {
            current.cancel(actor_id, reason, |request, actor| policy.allows(request, actor))
        })
    }

    pub fn delegate(
        &self,
        request_id: &str,
        slot_id: &str,
        from_principal: &str,
        to_principal: &str,
    ) -> Result<RequestLifecycle, ServiceError> {
        self.transition(request_id, "delegate", |current| {
            current.delegate(slot_id, from_principal, to_principal)
        })
    }

    /// Requests waiting on `principal_id` right now.
    pub fn pending_for(&self, principal_id: &str) -> Result<Vec<RequestLifecycle>, ServiceError> {
        let mut waiting = vec![];
        for request in self.list(Some(RequestState::Pending))? {
            let is_waiting = request
                .pending_approvers()?
                .iter()
                .any(|spec| spec.principal_id == principal_id);
            if is_waiting {
                waiting.push(request);
            }
        }
        Ok(waiting)
    }

    /// The approval timeline, oldest first.
    pub fn history(&self, request_id: &str) -> Result<Vec<ApprovalAction>, ServiceError> {
        let request = self.get(request_id)?;
        Ok(request.ordered_entries().into_iter().cloned().collect())
    }

    // Load, apply, save. Validation always runs against the freshly loaded
    // record and the save is revision checked.
    fn transition<F, E>(
        &self,
        request_id: &str,
        operation: &'static str,
        apply: F,
    ) -> Result<RequestLifecycle, ServiceError>
    where
        F: FnOnce(&RequestLifecycle) -> Result<RequestLifecycle, E>,
        E: Into<ServiceError>,
    {
        let current = self.get(request_id)?;

        let next: Result<RequestLifecycle, ServiceError> = apply(&current).map_err(Into::into);
        let next = next.inspect_err(|error| match error {
            ServiceError::Workflow(
                WorkflowError::UnknownApprover(principal) | WorkflowError::Unauthorized(principal),
            ) => {
                warn!(request_id, operation, principal = %principal, %error, "refused principal");
            }
            ServiceError::InvalidForm(errors) => {
                debug!(request_id, operation, invalid = errors.len(), "form incomplete");
            }
            _ => debug!(request_id, operation, %error, "transition refused"),
        })?;

        let saved = self.repository.save(&next).inspect_err(|error| {
            if let StoreError::Conflict { .. } = error {
                warn!(request_id, operation, %error, "concurrent update lost");
            }
        })?;

        info!(
            request_id,
            operation,
            from = %current.state(),
            to = %saved.state(),
            revision = saved.revision(),
            "request updated"
        );
        Ok(saved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approver::{ApprovalConfig, ApproverSpec};
    use crate::repository::InMemoryRequestRepository;
    use crate::template::{FieldKind, FieldValue, FormField};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Empties the form on the nth load, as if `edit_draft` landed between
    /// two reads of the same request.
    struct EditOnLoad {
        inner: InMemoryRequestRepository,
        loads: AtomicUsize,
        edit_on: usize,
    }

    impl RequestRepository for EditOnLoad {
        fn get(&self, id: &str) -> Result<Option<RequestLifecycle>, StoreError> {
            let load = self.loads.fetch_add(1, Ordering::SeqCst) + 1;
            match self.inner.get(id)? {
                Some(record) if load == self.edit_on => {
                    let edited = record.edit(FormData::new()).unwrap();
                    Ok(Some(self.inner.save(&edited)?))
                }
                other => Ok(other),
            }
        }
        fn save(&self, record: &RequestLifecycle) -> Result<RequestLifecycle, StoreError> {
            self.inner.save(record)
        }
        fn list(&self) -> Result<Vec<RequestLifecycle>, StoreError> {
            self.inner.list()
        }
    }

    fn service() -> RequestService<InMemoryRequestRepository> {
        RequestService::new(InMemoryRequestRepository::new(), ServiceConfig::default())
    }

    fn template() -> FormTemplate {
        FormTemplate::new(
            "tpl-purchase",
            "Purchase",
            ApprovalConfig::sequential()
                .with_approver(ApproverSpec::new("lead", "lena", 1))
                .with_approver(ApproverSpec::new("finance", "fred", 2).delegatable()),
        )
        .with_field(FormField::required("item", "Item", FieldKind::Text))
    }

    fn filled() -> FormData {
        FormData::new().with("item", FieldValue::Text("Monitor".into()))
    }

    #[test]
    fn submit_checks_the_form() {
        let service = service();
        let draft = service
            .create_draft(&template(), "rita", "Monitor", FormData::new())
            .unwrap();

        let err = service.submit(draft.id(), &template()).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidForm(ref errors) if errors.len() == 1));

        service.edit_draft(draft.id(), filled()).unwrap();
        let pending = service.submit(draft.id(), &template()).unwrap();
        assert_eq!(pending.state(), RequestState::Pending);
        assert_eq!(pending.revision(), 3);
    }

    #[test]
    fn template_edits_do_not_reach_pending_requests() {
        let service = service();
        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();
        service.submit(draft.id(), &template()).unwrap();

        let mut edited = template();
        edited.approval = ApprovalConfig::any_one().with_approver(ApproverSpec::new("ceo", "cleo", 1));

        let stored = service.get(draft.id()).unwrap();
        assert_eq!(stored.config(), &template().approval);
        assert!(matches!(
            service.submit(draft.id(), &edited),
            Err(ServiceError::Workflow(WorkflowError::InvalidTransition {
                from: RequestState::Pending,
                operation: crate::lifecycle::Operation::Submit,
            }))
        ));
    }

    #[test]
    fn draft_picks_up_template_edits_at_submit() {
        let service = service();
        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();

        let mut edited = template();
        edited.approval = ApprovalConfig::any_one().with_approver(ApproverSpec::new("ceo", "cleo", 1));

        let pending = service.submit(draft.id(), &edited).unwrap();
        assert_eq!(pending.config(), &edited.approval);
    }

    #[test]
    fn dashboard_follows_the_chain() {
        let service = service();
        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();
        service.submit(draft.id(), &template()).unwrap();

        assert_eq!(service.pending_for("lena").unwrap().len(), 1);
        assert!(service.pending_for("fred").unwrap().is_empty());

        service
            .record_action(draft.id(), "lena", Decision::Approved, None, true)
            .unwrap();
        assert!(service.pending_for("lena").unwrap().is_empty());
        assert_eq!(service.pending_for("fred").unwrap().len(), 1);
    }

    #[test]
    fn cancel_follows_the_policy() {
        let service = service();
        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();

        assert!(matches!(
            service.cancel(draft.id(), "lena", "nope"),
            Err(ServiceError::Workflow(WorkflowError::Unauthorized(_)))
        ));
        let cancelled = service.cancel(draft.id(), "rita", "bought one").unwrap();
        assert_eq!(cancelled.state(), RequestState::Cancelled);
    }

    #[test]
    fn unknown_ids_are_not_found() {
        assert!(matches!(service().get("req-1"), Err(ServiceError::NotFound(_))));
        let id = utils::new_prefixed_id("req_").unwrap();
        assert!(matches!(service().get(&id), Err(ServiceError::NotFound(_))));
    }

    #[test]
    fn mismatched_template_is_refused() {
        let service = service();
        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();

        let mut other = template();
        other.id = "tpl-other".into();
        assert!(matches!(
            service.submit(draft.id(), &other),
            Err(ServiceError::TemplateMismatch { .. })
        ));
    }

    #[test]
    fn submit_checks_the_form_it_submits() {
        let repository = EditOnLoad {
            inner: InMemoryRequestRepository::new(),
            loads: AtomicUsize::new(0),
            edit_on: 2,
        };
        let service = RequestService::new(repository, ServiceConfig::default());
        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();

        let err = service.submit(draft.id(), &template()).unwrap_err();
        assert!(matches!(
            err,
            ServiceError::InvalidForm(ref errors) if errors == &vec![FieldError::Missing("item".into())]
        ));

        let stored = service.get(draft.id()).unwrap();
        assert_eq!(stored.state(), RequestState::Draft);
        assert!(stored.request().form_data.get("item").is_none());
    }

    #[test]
    fn uppercase_prefix_still_finds_its_requests() {
        let mut config = ServiceConfig::default();
        config.ids.request_prefix = "REQ_".into();
        let service = RequestService::new(InMemoryRequestRepository::new(), config);

        let draft = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap();
        assert!(draft.id().starts_with("req_1"));
        assert_eq!(service.get(draft.id()).unwrap(), draft);
        assert_eq!(service.submit(draft.id(), &template()).unwrap().state(), RequestState::Pending);
    }

    #[test]
    fn id_failure_keeps_its_cause() {
        let mut config = ServiceConfig::default();
        config.ids.request_prefix = String::new();
        let service = RequestService::new(InMemoryRequestRepository::new(), config);

        let err = service
            .create_draft(&template(), "rita", "Monitor", filled())
            .unwrap_err();
        assert!(matches!(err, ServiceError::Identifier(ref msg) if msg.starts_with("invalid id prefix ``: ")));
    }
}
