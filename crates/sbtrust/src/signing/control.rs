//! Batch control: cooperative cancellation and the per-kernel guard.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sbtrust_core::{Result, TrustError};

/// Cooperative cancellation flag, checked between modules.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the running batch to stop after the current module.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Kernels with a signing batch in progress.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    kernels: Arc<Mutex<HashSet<String>>>,
}

impl InFlight {
    /// Claim `kernel` for the lifetime of the returned lease.
    ///
    /// # Errors
    ///
    /// `SigningInProgress` if another batch holds the kernel.
    pub fn try_acquire(&self, kernel: &str) -> Result<KernelLease> {
        let mut kernels = self.kernels.lock().unwrap_or_else(PoisonError::into_inner);
        if !kernels.insert(kernel.to_string()) {
            return Err(TrustError::SigningInProgress {
                kernel: kernel.to_string(),
            });
        }
        Ok(KernelLease {
            kernels: Arc::clone(&self.kernels),
            kernel: kernel.to_string(),
        })
    }

    pub fn is_busy(&self, kernel: &str) -> bool {
        self.kernels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(kernel)
    }
}

/// Releases the kernel when dropped.
#[derive(Debug)]
pub struct KernelLease {
    kernels: Arc<Mutex<HashSet<String>>>,
    kernel: String,
}

impl Drop for KernelLease {
    fn drop(&mut self) {
        self.kernels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.kernel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_is_exclusive_per_kernel() {
        let guard = InFlight::default();
        let lease = guard.try_acquire("6.9.1").unwrap();
        assert!(matches!(
            guard.try_acquire("6.9.1"),
            Err(TrustError::SigningInProgress { .. })
        ));
        let _other = guard.try_acquire("6.8.0").unwrap();

        drop(lease);
        assert!(!guard.is_busy("6.9.1"));
        assert!(guard.try_acquire("6.9.1").is_ok());
    }

    #[test]
    fn cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
    }
}
