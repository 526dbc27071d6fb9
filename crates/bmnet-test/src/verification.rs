//! Verification helpers for stored VIF state and plumbing order

use bmnet_common::{NetError, NetworkPhase, NodeStore};
use thiserror::Error;

use crate::fakes::PlumbOp;

/// Verification error types
#[derive(Error, Debug)]
pub enum VerificationError {
    #[error("Store error: {0}")]
    Store(#[from] NetError),

    #[error("Port '{port}' {phase} VIF: expected {expected:?}, got {actual:?}")]
    VifMismatch {
        port: String,
        phase: NetworkPhase,
        expected: Option<String>,
        actual: Option<String>,
    },

    #[error("Expected plumbing step {expected:?} after position {after}, not found in {ops:?}")]
    StepMissing {
        expected: PlumbOp,
        after: usize,
        ops: Vec<PlumbOp>,
    },
}

/// Result type for verification operations
pub type VerifyResult<T> = Result<T, VerificationError>;

/// Stored port verification helper
pub struct PortVerifier<'a> {
    store: &'a dyn NodeStore,
}

impl<'a> PortVerifier<'a> {
    /// Create a verifier reading from `store`
    pub fn new(store: &'a dyn NodeStore) -> Self {
        Self { store }
    }

    /// Verify the VIF stored for `phase` on `port_id`
    pub async fn assert_vif(
        &self,
        port_id: &str,
        phase: NetworkPhase,
        expected: Option<&str>,
    ) -> VerifyResult<()> {
        let port = self.store.get_port(port_id).await?;
        let actual = port.vif_for(phase).map(str::to_string);
        if actual.as_deref() != expected {
            return Err(VerificationError::VifMismatch {
                port: port_id.to_string(),
                phase,
                expected: expected.map(str::to_string),
                actual,
            });
        }
        Ok(())
    }

    /// Verify `port_id` carries no VIF for any phase
    pub async fn assert_no_vifs(&self, port_id: &str) -> VerifyResult<()> {
        for phase in [
            NetworkPhase::Provisioning,
            NetworkPhase::Cleaning,
            NetworkPhase::Tenant,
        ] {
            self.assert_vif(port_id, phase, None).await?;
        }
        Ok(())
    }
}

/// Verify `expected` occurs in `ops` as an ordered subsequence
pub fn assert_ops_in_order(ops: &[PlumbOp], expected: &[PlumbOp]) -> VerifyResult<()> {
    let mut pos = 0;
    for want in expected {
        match ops[pos..].iter().position(|op| op == want) {
            Some(offset) => pos += offset + 1,
            None => {
                return Err(VerificationError::StepMissing {
                    expected: want.clone(),
                    after: pos,
                    ops: ops.to_vec(),
                })
            }
        }
    }
    Ok(())
}
