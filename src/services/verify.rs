use {
    super::applier::{CheckoutApplier, Reconciliation},
    crate::domain::{
        alert::{Alert, AlertSink, AlertType, ReconciliationAlert},
        error::PipelineError,
        id::CheckoutSessionId,
    },
    serde::Serialize,
    std::sync::Arc,
    uuid::Uuid,
};

const FAILED_MESSAGE: &str = "Payment received but enrollment failed - please contact support";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Enrolled,
    PaymentIncomplete,
    ReconciliationFailed,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub session_id: String,
    pub payment_status: String,
    pub enrollment_status: EnrollmentStatus,
    pub was_reconciled: bool,
    pub message: String,
}

/// Called by the client after the checkout redirect. Applies the purchase
/// inline if the webhook has not done so yet.
pub struct CheckoutVerifier {
    applier: Arc<CheckoutApplier>,
    alerts: Arc<dyn AlertSink>,
}

impl CheckoutVerifier {
    pub fn new(applier: Arc<CheckoutApplier>, alerts: Arc<dyn AlertSink>) -> Self {
        Self { applier, alerts }
    }

    /// Errors are reserved for failures before payment is known to have
    /// succeeded (provider lookup, authorization). Once the session is paid,
    /// every outcome is a `VerificationResult`.
    #[tracing::instrument(skip_all, fields(session_id = %session_id, customer_id = %requester))]
    pub async fn verify(
        &self,
        session_id: &CheckoutSessionId,
        requester: Uuid,
    ) -> Result<VerificationResult, PipelineError> {
        let provider = self.applier.provider();
        let session = self
            .applier
            .provider_call("get checkout session", provider.get_checkout_session(session_id))
            .await?;

        let owner = match session.customer_id() {
            Ok(owner) => owner,
            Err(e) if session.has_user_id() => {
                tracing::warn!(error = %e, "checkout session carries an unreadable owner");
                return Err(PipelineError::AccessDenied);
            }
            Err(e) => return Err(e),
        };
        if owner != requester {
            tracing::warn!(owner = %owner, "checkout session requested by another customer");
            return Err(PipelineError::AccessDenied);
        }

        let payment_status = session.payment_status.as_str().to_string();
        let result = |enrollment_status, was_reconciled, message: &str| VerificationResult {
            session_id: session_id.to_string(),
            payment_status: payment_status.clone(),
            enrollment_status,
            was_reconciled,
            message: message.to_string(),
        };

        if !session.is_paid() {
            return Ok(result(
                EnrollmentStatus::PaymentIncomplete,
                false,
                "Payment has not been completed",
            ));
        }

        let product = match self.applier.resolve_product(&session).await {
            Ok(product) => product,
            Err(e) => {
                self.alert_failure(session_id, owner, "unknown", &e);
                return Ok(result(
                    EnrollmentStatus::ReconciliationFailed,
                    false,
                    FAILED_MESSAGE,
                ));
            }
        };
        let product_name = product.as_str();

        match self.applier.reconcile_product(&session, owner, product).await {
            Ok(outcome) => match outcome.result {
                Reconciliation::AlreadyApplied | Reconciliation::LostRace => Ok(result(
                    EnrollmentStatus::Enrolled,
                    false,
                    "Customer is already enrolled",
                )),
                Reconciliation::Applied => {
                    tracing::info!(product = product_name, "checkout reconciled on verify");
                    Ok(result(
                        EnrollmentStatus::Enrolled,
                        true,
                        "Payment verified and enrollment completed",
                    ))
                }
            },
            Err(e) => {
                self.alert_failure(session_id, owner, product_name, &e);
                Ok(result(
                    EnrollmentStatus::ReconciliationFailed,
                    false,
                    FAILED_MESSAGE,
                ))
            }
        }
    }

    fn alert_failure(
        &self,
        session_id: &CheckoutSessionId,
        owner: Uuid,
        product: &str,
        e: &PipelineError,
    ) {
        tracing::error!(error = %e, product, "payment received but reconciliation failed");
        self.alerts.send(Alert::Reconciliation(ReconciliationAlert {
            session_id: session_id.to_string(),
            customer_id: Some(owner),
            alert_type: AlertType::ReconciliationFailure,
            error_message: e.to_string(),
            was_fixed: false,
            product: product.into(),
        }));
    }
}
