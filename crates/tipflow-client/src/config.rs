use std::time::Duration;

use tipflow_types::{Address, ChainId};

use crate::chain::{RequestMeta, RetryPolicy};

pub const DEFAULT_PERMIT_VALIDITY: Duration = Duration::from_secs(3_600);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Deployment addresses and client tuning.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub chain_id: ChainId,
    pub escrow: Address,
    pub token: Address,
    /// How long a funding permit stays valid after the latest block.
    pub permit_validity: Duration,
    pub retry_policy: RetryPolicy,
    /// Upper bound for one logical read, retries included.
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(chain_id: ChainId, escrow: Address, token: Address) -> Self {
        Self {
            chain_id,
            escrow,
            token,
            permit_validity: DEFAULT_PERMIT_VALIDITY,
            retry_policy: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_permit_validity(mut self, permit_validity: Duration) -> Self {
        self.permit_validity = permit_validity;
        self
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn request_meta(&self) -> RequestMeta {
        RequestMeta {
            timeout_ms: self.request_timeout.as_millis() as u64,
            retry_policy: self.retry_policy.clone(),
        }
    }
}
