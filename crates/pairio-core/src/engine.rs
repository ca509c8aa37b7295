//! Admission engine
//!
//! Orchestrates one request: resolve the channel, verify the signature,
//! resolve the collection, then ask the collection for a ticket. The caller
//! performs the store operation once the ticket is ready and hands the ticket
//! back through [`AdmissionEngine::finalize`].

use crate::admission::{AdmissionTicket, OperationKind, QuotaExceeded};
use crate::registry::{ChannelRegistry, ChannelSnapshot};
use crate::signature::{SignatureAlgorithm, SignatureVerifier};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Delay imposed on callers presenting a bad signature
pub const DEFAULT_AUTH_PENALTY: Duration = Duration::from_secs(1);

/// Engine settings that do not come from the channel file
#[derive(Clone)]
pub struct EngineConfig {
    pub signature_algorithm: SignatureAlgorithm,
    pub test_signature: Option<String>,
    pub allow_test_signature: bool,
    pub auth_penalty: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signature_algorithm: SignatureAlgorithm::default(),
            test_signature: None,
            allow_test_signature: false,
            auth_penalty: DEFAULT_AUTH_PENALTY,
        }
    }
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("signature_algorithm", &self.signature_algorithm)
            .field(
                "test_signature",
                &self.test_signature.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_test_signature", &self.allow_test_signature)
            .field("auth_penalty", &self.auth_penalty)
            .finish()
    }
}

impl EngineConfig {
    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    pub fn with_test_signature(mut self, secret: impl Into<String>, allow: bool) -> Self {
        self.test_signature = Some(secret.into());
        self.allow_test_signature = allow;
        self
    }

    pub fn with_auth_penalty(mut self, penalty: Duration) -> Self {
        self.auth_penalty = penalty;
        self
    }

    fn verifier(&self) -> SignatureVerifier {
        let verifier = SignatureVerifier::new(self.signature_algorithm);
        match &self.test_signature {
            Some(secret) => verifier.with_test_signature(secret.clone(), self.allow_test_signature),
            None => verifier,
        }
    }
}

/// Transport details the engine needs from the HTTP layer
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, received_at: DateTime<Utc>) -> Self {
        Self {
            method: method.into(),
            received_at,
        }
    }

    /// A counted `GET` received now
    pub fn get() -> Self {
        Self::new("GET", Utc::now())
    }

    /// A zero-weight `HEAD` received now
    pub fn head() -> Self {
        Self::new("HEAD", Utc::now())
    }

    pub fn at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn is_inspection(&self) -> bool {
        self.method.eq_ignore_ascii_case("HEAD")
    }

    /// Quota cost of the request
    pub fn weight(&self) -> u64 {
        if self.is_inspection() {
            0
        } else {
            1
        }
    }
}

/// Why a request was turned away
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("Channel not found in config: {0}")]
    ChannelNotFound(String),

    #[error("Collection not found for channel {channel}: {collection}")]
    CollectionNotFound { channel: String, collection: String },

    #[error("Incorrect or missing signature")]
    InvalidSignature,

    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
}

/// Outcome of [`AdmissionEngine::authorize`]
#[derive(Debug)]
pub enum Decision {
    /// The request must not proceed. A penalty, when present, must elapse
    /// before the caller responds.
    Rejected {
        reason: RejectReason,
        penalty: Option<Duration>,
    },
    /// Queued behind in-flight operations; await [`AdmissionTicket::wait_ready`]
    Deferred(AdmissionTicket),
    /// Holds a concurrency slot and may run now
    Admitted(AdmissionTicket),
}

impl Decision {
    fn rejected(reason: RejectReason) -> Self {
        Decision::Rejected {
            reason,
            penalty: None,
        }
    }

    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admitted(_))
    }

    pub fn is_deferred(&self) -> bool {
        matches!(self, Decision::Deferred(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Rejected { .. })
    }

    /// The ticket of an admitted or deferred decision
    pub fn into_ticket(self) -> Option<AdmissionTicket> {
        match self {
            Decision::Admitted(ticket) | Decision::Deferred(ticket) => Some(ticket),
            Decision::Rejected { .. } => None,
        }
    }
}

/// Admission engine over a fixed channel registry
#[derive(Debug)]
pub struct AdmissionEngine {
    registry: ChannelRegistry,
    verifier: SignatureVerifier,
    auth_penalty: Duration,
}

impl AdmissionEngine {
    pub fn new(registry: ChannelRegistry, config: EngineConfig) -> Self {
        let verifier = config.verifier();
        if verifier.test_bypass_enabled() {
            warn!("WARNING: test signature bypass is enabled; any request presenting it is accepted");
        } else if config
            .test_signature
            .as_deref()
            .is_some_and(|secret| !secret.is_empty())
        {
            warn!("A test signature is configured but not allowed; it will be ignored");
        }
        info!(
            "Admission engine ready: {} channel(s), {} signatures",
            registry.len(),
            verifier.algorithm()
        );
        Self {
            registry,
            verifier,
            auth_penalty: config.auth_penalty,
        }
    }

    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub fn auth_penalty(&self) -> Duration {
        self.auth_penalty
    }

    /// Decide whether an operation may run.
    ///
    /// `value` is only covered by the signature for writes.
    #[allow(clippy::too_many_arguments)]
    pub fn authorize(
        &self,
        operation: OperationKind,
        channel_name: &str,
        collection_name: &str,
        key: &str,
        value: Option<&str>,
        signature: &str,
        ctx: &RequestContext,
    ) -> Decision {
        let Some(channel) = self.registry.resolve(channel_name) else {
            debug!("Rejected {}: unknown channel {}", operation, channel_name);
            return Decision::rejected(RejectReason::ChannelNotFound(channel_name.to_string()));
        };

        if !self.verifier.verify(
            operation,
            collection_name,
            key,
            value,
            channel.password(),
            signature,
        ) {
            debug!(
                "Rejected {} on channel {}: incorrect or missing signature",
                operation, channel_name
            );
            return Decision::Rejected {
                reason: RejectReason::InvalidSignature,
                penalty: Some(self.auth_penalty),
            };
        }

        let Some(collection) = channel.find_collection(collection_name) else {
            debug!(
                "Rejected {}: unknown collection {} on channel {}",
                operation, collection_name, channel_name
            );
            return Decision::rejected(RejectReason::CollectionNotFound {
                channel: channel_name.to_string(),
                collection: collection_name.to_string(),
            });
        };

        match collection.request_admission(operation, ctx.weight(), ctx.received_at) {
            Ok(ticket) if ticket.is_ready() => Decision::Admitted(ticket),
            Ok(ticket) => Decision::Deferred(ticket),
            Err(exceeded) => Decision::rejected(exceeded.into()),
        }
    }

    /// Hand a ticket back once its operation has completed, whatever the
    /// outcome of the store call.
    pub fn finalize(&self, channel_name: &str, ticket: AdmissionTicket) {
        if self.registry.resolve(channel_name).is_none() {
            error!(
                "Finalizing ticket {} for unknown channel {}",
                ticket.id(),
                channel_name
            );
            debug_assert!(false, "ticket finalized for an unknown channel");
        }
        ticket.finalize();
    }

    pub fn snapshot(&self) -> Vec<ChannelSnapshot> {
        self.registry.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ChannelConfig, CollectionConfig, PairioConfig};
    use crate::signature::sign;

    fn engine(config: EngineConfig) -> AdmissionEngine {
        let registry = ChannelRegistry::from_config(&PairioConfig::new(vec![
            ChannelConfig::new("lab", "pw")
                .with_collection(CollectionConfig::new("default", 2, 1)),
        ]))
        .unwrap();
        AdmissionEngine::new(registry, config)
    }

    fn read_sig(key: &str) -> String {
        sign(
            SignatureAlgorithm::Sha256,
            OperationKind::Read,
            "default",
            key,
            None,
            "pw",
        )
    }

    #[test]
    fn test_request_context_weight() {
        assert_eq!(RequestContext::get().weight(), 1);
        assert_eq!(RequestContext::head().weight(), 0);
        assert_eq!(RequestContext::new("head", Utc::now()).weight(), 0);
        assert_eq!(RequestContext::new("POST", Utc::now()).weight(), 1);
    }

    #[test]
    fn test_admitted_with_valid_signature() {
        let engine = engine(EngineConfig::default());
        let ctx = RequestContext::get();
        let decision = engine.authorize(
            OperationKind::Read,
            "lab",
            "default",
            "k1",
            None,
            &read_sig("k1"),
            &ctx,
        );
        assert!(decision.is_admitted());
        engine.finalize("lab", decision.into_ticket().unwrap());

        let snapshot = engine.snapshot();
        assert_eq!(snapshot[0].collections[0].completed_reads, 1);
    }

    #[test]
    fn test_unknown_channel_has_no_penalty() {
        let engine = engine(EngineConfig::default());
        match engine.authorize(
            OperationKind::Read,
            "nope",
            "default",
            "k1",
            None,
            &read_sig("k1"),
            &RequestContext::get(),
        ) {
            Decision::Rejected { reason, penalty } => {
                assert_eq!(reason, RejectReason::ChannelNotFound("nope".into()));
                assert!(penalty.is_none());
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_bad_signature_carries_penalty() {
        let engine = engine(EngineConfig::default().with_auth_penalty(Duration::from_millis(5)));
        match engine.authorize(
            OperationKind::Read,
            "lab",
            "default",
            "k1",
            None,
            "deadbeef",
            &RequestContext::get(),
        ) {
            Decision::Rejected { reason, penalty } => {
                assert_eq!(reason, RejectReason::InvalidSignature);
                assert_eq!(penalty, Some(Duration::from_millis(5)));
            }
            other => panic!("unexpected decision {:?}", other),
        }
    }

    #[test]
    fn test_signature_checked_before_collection() {
        let engine = engine(EngineConfig::default());
        let decision = engine.authorize(
            OperationKind::Read,
            "lab",
            "missing",
            "k1",
            None,
            "bogus",
            &RequestContext::get(),
        );
        assert!(matches!(
            decision,
            Decision::Rejected {
                reason: RejectReason::InvalidSignature,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_collection() {
        let engine = engine(EngineConfig::default());
        let sig = sign(
            SignatureAlgorithm::Sha256,
            OperationKind::Read,
            "missing",
            "k1",
            None,
            "pw",
        );
        let decision = engine.authorize(
            OperationKind::Read,
            "lab",
            "missing",
            "k1",
            None,
            &sig,
            &RequestContext::get(),
        );
        assert!(matches!(
            decision,
            Decision::Rejected {
                reason: RejectReason::CollectionNotFound { .. },
                penalty: None,
            }
        ));
    }

    #[test]
    fn test_quota_rejection() {
        let engine = engine(EngineConfig::default());
        let now = Utc::now();
        let sig = sign(
            SignatureAlgorithm::Sha256,
            OperationKind::Write,
            "default",
            "k",
            Some("v"),
            "pw",
        );
        let ctx = RequestContext::new("GET", now);
        let first = engine.authorize(OperationKind::Write, "lab", "default", "k", Some("v"), &sig, &ctx);
        assert!(first.is_admitted());
        let second = engine.authorize(OperationKind::Write, "lab", "default", "k", Some("v"), &sig, &ctx);
        assert!(matches!(
            second,
            Decision::Rejected {
                reason: RejectReason::QuotaExceeded(_),
                penalty: None,
            }
        ));
    }

    #[test]
    fn test_head_requests_skip_quota() {
        let engine = engine(EngineConfig::default());
        let now = Utc::now();
        let sig = read_sig("k");
        for _ in 0..3 {
            let decision = engine.authorize(
                OperationKind::Read,
                "lab",
                "default",
                "k",
                None,
                &sig,
                &RequestContext::head().at(now),
            );
            assert!(decision.is_admitted());
        }
        let snapshot = &engine.snapshot()[0].collections[0];
        assert_eq!(snapshot.completed_reads, 0);
        assert_eq!(snapshot.pending_reads, 0);
    }

    #[test]
    fn test_test_signature_requires_opt_in() {
        let disallowed = engine(EngineConfig::default().with_test_signature("letmein", false));
        assert!(disallowed
            .authorize(
                OperationKind::Read,
                "lab",
                "default",
                "k",
                None,
                "letmein",
                &RequestContext::get(),
            )
            .is_rejected());

        let allowed = engine(EngineConfig::default().with_test_signature("letmein", true));
        assert!(allowed
            .authorize(
                OperationKind::Read,
                "lab",
                "default",
                "k",
                None,
                "letmein",
                &RequestContext::get(),
            )
            .is_admitted());
    }

    #[test]
    fn test_config_debug_redacts_test_signature() {
        let config = EngineConfig::default().with_test_signature("letmein", true);
        let debug = format!("{:?}", config);
        assert!(!debug.contains("letmein"));
    }
}
