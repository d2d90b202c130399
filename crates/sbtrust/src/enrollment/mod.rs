//! Machine Owner Key enrollment lifecycle.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use sbtrust_core::{
    EnrollmentSecret, EnrollmentStatus, HistoryAction, MokKey, MokListing, Result, SigningIdentity,
    TrustError,
};

use crate::exec::tools::require_tool;
use crate::exec::{CommandRunner, Invocation};
use crate::history::HistoryLog;
use crate::keys::sha1_fingerprint;
use crate::privilege::{HelperRequest, HelperResponse, MokAuth, PrivilegeBroker};

pub mod cache;
pub mod parse;

pub use cache::ListingCache;

/// Drives `mokutil` through the privilege broker and caches its listing.
pub struct EnrollmentController {
    broker: Arc<dyn PrivilegeBroker>,
    runner: Arc<dyn CommandRunner>,
    history: Arc<HistoryLog>,
    cache: ListingCache,
    markers: Vec<String>,
    timeout: Duration,
}

impl EnrollmentController {
    pub fn new(
        broker: Arc<dyn PrivilegeBroker>,
        runner: Arc<dyn CommandRunner>,
        history: Arc<HistoryLog>,
        markers: Vec<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            broker,
            runner,
            history,
            cache: ListingCache::new(),
            markers,
            timeout,
        }
    }

    /// Enrolled and pending keys, fetched at most once per cache interval.
    ///
    /// # Errors
    ///
    /// `ToolMissing`, `AuthDenied`, `Timeout`, or the helper's failure.
    pub async fn listing(&self) -> Result<Arc<MokListing>> {
        self.cache
            .get_or_fetch(|| async {
                require_tool(self.runner.as_ref(), "mokutil")?;
                info!("fetching MOK listing");
                self.privileged(HelperRequest::MokListing)
                    .await?
                    .into_listing()
            })
            .await
    }

    /// Keys enrolled in firmware.
    ///
    /// # Errors
    ///
    /// See [`EnrollmentController::listing`].
    pub async fn list_enrolled(&self) -> Result<Vec<MokKey>> {
        Ok(self.listing().await?.enrolled.clone())
    }

    /// Keys queued for enrollment at the next boot.
    ///
    /// # Errors
    ///
    /// See [`EnrollmentController::listing`].
    pub async fn list_pending(&self) -> Result<Vec<MokKey>> {
        Ok(self.listing().await?.pending.clone())
    }

    /// Whether any of `identities` is enrolled or pending.
    ///
    /// Keys are matched by SHA-1 certificate fingerprint first, then by the
    /// identity's common name or one of the historical subject markers. A
    /// marker-only match reports no identity name.
    ///
    /// # Errors
    ///
    /// See [`EnrollmentController::listing`].
    #[instrument(skip_all)]
    pub async fn status(&self, identities: &[SigningIdentity]) -> Result<EnrollmentStatus> {
        let listing = self.listing().await?;

        let mut fingerprints = Vec::with_capacity(identities.len());
        for identity in identities {
            fingerprints.push(sha1_fingerprint(identity).await);
        }

        let enrolled = self.find_match(&listing.enrolled, identities, &fingerprints);
        let pending = self.find_match(&listing.pending, identities, &fingerprints);

        Ok(EnrollmentStatus {
            enrolled: enrolled.is_some(),
            pending: pending.is_some(),
            matched_identity_name: enrolled.or(pending).flatten(),
            raw_listing: listing.raw_enrolled.clone(),
        })
    }

    /// `Some(name)` for an identity match, `Some(None)` for a marker-only match.
    fn find_match(
        &self,
        keys: &[MokKey],
        identities: &[SigningIdentity],
        fingerprints: &[Option<String>],
    ) -> Option<Option<String>> {
        for key in keys {
            if let Some(fp) = &key.sha1_fingerprint {
                if let Some(pos) = fingerprints.iter().position(|f| f.as_ref() == Some(fp)) {
                    return Some(Some(identities[pos].name.clone()));
                }
            }
        }
        for key in keys {
            let Some(subject) = key.subject.as_deref() else {
                continue;
            };
            if let Some(id) = identities
                .iter()
                .find(|id| !id.common_name.is_empty() && subject.contains(&id.common_name))
            {
                return Some(Some(id.name.clone()));
            }
            if self.markers.iter().any(|m| subject.contains(m.as_str())) {
                return Some(None);
            }
        }
        None
    }

    /// Queue `identity`'s certificate for enrollment.
    ///
    /// # Errors
    ///
    /// `KeyMissing` without a DER certificate, plus any broker/tool failure.
    #[instrument(skip_all, fields(identity = %identity.name))]
    pub async fn import(&self, identity: &SigningIdentity, secret: &EnrollmentSecret) -> Result<String> {
        let details = serde_json::json!({ "identity": identity.name, "certificate": identity.cert_der_path });
        let result = async {
            require_certificate(identity)?;
            self.mutate(secret, |auth| HelperRequest::MokImport {
                cert: identity.cert_der_path.clone(),
                auth,
            })
            .await
        }
        .await;
        self.finish(HistoryAction::ImportKey, details, result).await
    }

    /// Queue `identity`'s certificate for removal.
    ///
    /// # Errors
    ///
    /// `KeyMissing` without a DER certificate, plus any broker/tool failure.
    #[instrument(skip_all, fields(identity = %identity.name))]
    pub async fn delete(&self, identity: &SigningIdentity, secret: &EnrollmentSecret) -> Result<String> {
        let details = serde_json::json!({ "identity": identity.name, "certificate": identity.cert_der_path });
        let result = async {
            require_certificate(identity)?;
            self.mutate(secret, |auth| HelperRequest::MokDelete {
                cert: identity.cert_der_path.clone(),
                auth,
            })
            .await
        }
        .await;
        self.finish(HistoryAction::DeleteKey, details, result).await
    }

    /// Queue removal of every enrolled MOK.
    ///
    /// # Errors
    ///
    /// Any broker/tool failure.
    #[instrument(skip_all)]
    pub async fn reset(&self, secret: &EnrollmentSecret) -> Result<String> {
        let result = self.mutate(secret, |auth| HelperRequest::MokReset { auth }).await;
        self.finish(HistoryAction::ResetKeys, serde_json::json!({}), result)
            .await
    }

    /// Drop the cached listing.
    pub fn clear_cache(&self) {
        self.cache.invalidate();
    }

    async fn mutate<F>(&self, secret: &EnrollmentSecret, request: F) -> Result<String>
    where
        F: FnOnce(MokAuth) -> HelperRequest + Send,
    {
        require_tool(self.runner.as_ref(), "mokutil")?;
        // the hash file must outlive the privileged call
        let (auth, _hash_file) = self.prepare_auth(secret).await?;
        let resp = self.privileged(request(auth)).await?;
        Ok(match resp {
            HelperResponse::Done { detail: Some(d) } => d,
            _ => "Change queued; reboot and confirm it in the MOK manager".to_string(),
        })
    }

    async fn finish(
        &self,
        action: HistoryAction,
        mut details: serde_json::Value,
        result: Result<String>,
    ) -> Result<String> {
        self.cache.invalidate();
        if let (Err(e), Some(map)) = (&result, details.as_object_mut()) {
            map.insert("error".into(), e.to_string().into());
        }
        self.history.record(action, details, result.is_ok()).await;
        result
    }

    async fn prepare_auth(
        &self,
        secret: &EnrollmentSecret,
    ) -> Result<(MokAuth, Option<tempfile::NamedTempFile>)> {
        match secret {
            EnrollmentSecret::RootPassword => Ok((MokAuth::RootPassword, None)),
            EnrollmentSecret::OneTimePassword(password) => {
                // mokutil prompts twice when no password is given inline
                let inv = Invocation::new("mokutil")
                    .arg("--generate-hash")
                    .stdin_secret(format!("{password}\n{password}\n"));
                let out = self.runner.run_checked(&inv).await?;
                let Some(hash) = crypt_hash(&out.stdout) else {
                    return Err(TrustError::ToolFailed {
                        tool: "mokutil".into(),
                        status: "exit 0".into(),
                        stderr: "no password hash in output".into(),
                    });
                };
                let mut file = tempfile::Builder::new()
                    .prefix("sbtrust-mok-hash")
                    .tempfile()
                    .map_err(|e| TrustError::io("password hash file", e))?;
                writeln!(file, "{hash}").map_err(|e| TrustError::io(file.path(), e))?;
                let auth = MokAuth::HashFile {
                    path: file.path().to_path_buf(),
                };
                Ok((auth, Some(file)))
            }
        }
    }

    async fn privileged(&self, request: HelperRequest) -> Result<HelperResponse> {
        let op = request.name();
        let call = async {
            let mut session = self.broker.open().await?;
            let resp = session.call(request).await;
            session.close().await?;
            resp?.into_result()
        };
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                tracing::warn!(op, "privileged operation timed out");
                TrustError::Timeout(self.timeout)
            })?
    }
}

fn require_certificate(identity: &SigningIdentity) -> Result<()> {
    if identity.cert_der_path.is_file() {
        Ok(())
    } else {
        Err(TrustError::KeyMissing {
            name: identity.name.clone(),
            missing: vec![identity.cert_der_path.clone()],
        })
    }
}

/// The crypt(3) string in `mokutil --generate-hash` output, after any prompts.
fn crypt_hash(stdout: &str) -> Option<&str> {
    stdout
        .split_whitespace()
        .rev()
        .find(|token| token.starts_with('$'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::testing::FakeRunner;
    use crate::exec::{CommandOutput, Secret};
    use crate::hash::sha1_bytes;
    use crate::privilege::{InProcessBroker, OpExecutor};
    use chrono::Utc;
    use std::path::Path;

    struct Fixture {
        _dir: tempfile::TempDir,
        runner: Arc<FakeRunner>,
        history: Arc<HistoryLog>,
        controller: EnrollmentController,
        identity: SigningIdentity,
    }

    fn fixture(enrolled: &str, pending: &str) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new().with_tools(&["mokutil"]));
        runner.script("mokutil", &["--list-enrolled"], CommandOutput::ok(enrolled));
        runner.script("mokutil", &["--list-new"], CommandOutput::ok(pending));
        let history = Arc::new(HistoryLog::new(dir.path().join("h.json"), 100));
        let broker = Arc::new(InProcessBroker::new(Arc::new(OpExecutor::new(runner.clone()))));
        let controller = EnrollmentController::new(
            broker,
            runner.clone(),
            history.clone(),
            vec!["Kernel Module Signing Key".into(), "KernelCustom".into()],
            Duration::from_secs(5),
        );
        let identity = identity_in(dir.path(), "MOK", "Lab Key");
        Fixture {
            _dir: dir,
            runner,
            history,
            controller,
            identity,
        }
    }

    fn identity_in(dir: &Path, name: &str, cn: &str) -> SigningIdentity {
        let der = dir.join(format!("{name}.der"));
        std::fs::write(&der, format!("der of {name}")).unwrap();
        SigningIdentity {
            name: name.into(),
            common_name: cn.into(),
            private_key_path: dir.join(format!("{name}.priv")),
            cert_der_path: der,
            cert_pem_path: dir.join(format!("{name}.pem")),
            created_at: Utc::now(),
        }
    }

    fn listing_with_fp(fp: &str, subject: &str) -> String {
        format!("[key 1]\nSHA1 Fingerprint: {fp}\n        Subject: {subject}\n")
    }

    #[tokio::test]
    async fn matches_by_fingerprint_first() {
        let fp = sha1_bytes(b"der of MOK");
        let f = fixture(&listing_with_fp(&fp, "CN=Something Else"), "MokNew is empty\n");
        let status = f.controller.status(std::slice::from_ref(&f.identity)).await.unwrap();
        assert!(status.enrolled);
        assert!(!status.pending);
        assert_eq!(status.matched_identity_name.as_deref(), Some("MOK"));
    }

    #[tokio::test]
    async fn matches_by_common_name_then_marker() {
        let f = fixture(&listing_with_fp("00", "CN=Lab Key"), "MokNew is empty\n");
        let status = f.controller.status(std::slice::from_ref(&f.identity)).await.unwrap();
        assert_eq!(status.matched_identity_name.as_deref(), Some("MOK"));

        let f = fixture("MokListRT is empty\n", &listing_with_fp("00", "CN=KernelCustom 2019"));
        let status = f.controller.status(std::slice::from_ref(&f.identity)).await.unwrap();
        assert!(!status.enrolled);
        assert!(status.pending);
        assert_eq!(status.matched_identity_name, None);
    }

    #[tokio::test]
    async fn reads_share_one_privileged_fetch() {
        let f = fixture("MokListRT is empty\n", "MokNew is empty\n");
        f.controller.list_enrolled().await.unwrap();
        f.controller.list_pending().await.unwrap();
        f.controller.status(&[]).await.unwrap();
        assert_eq!(
            f.runner
                .calls_to("mokutil")
                .iter()
                .filter(|c| c.args == ["--list-enrolled"])
                .count(),
            1
        );

        f.controller.clear_cache();
        f.controller.list_enrolled().await.unwrap();
        assert_eq!(
            f.runner
                .calls_to("mokutil")
                .iter()
                .filter(|c| c.args == ["--list-enrolled"])
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn import_hashes_password_invalidates_and_records() {
        let f = fixture("MokListRT is empty\n", "MokNew is empty\n");
        f.controller.list_enrolled().await.unwrap();

        f.controller
            .import(&f.identity, &EnrollmentSecret::OneTimePassword("hunter22".into()))
            .await
            .unwrap();

        let calls = f.runner.calls_to("mokutil");
        let hashing = calls.iter().find(|c| c.args == ["--generate-hash"]).unwrap();
        assert_eq!(
            hashing.stdin.as_ref().map(Secret::expose),
            Some("hunter22\nhunter22\n")
        );
        for call in &calls {
            assert!(call.args.iter().all(|a| !a.contains("hunter22")), "password in argv: {call}");
            assert!(!call.to_string().contains("hunter22"));
        }
        let import = calls.iter().find(|c| c.args[0] == "--import").unwrap();
        assert_eq!(import.args[2], "--hash-file");
        assert!(f.controller.cache.peek().is_none());
        let entry = &f.history.entries().await[0];
        assert_eq!(entry.action, HistoryAction::ImportKey);
        assert!(entry.success);
    }

    #[test]
    fn hash_is_taken_from_after_the_prompts() {
        assert_eq!(
            crypt_hash("input password: input password again: $6$salt$hash\n"),
            Some("$6$salt$hash")
        );
        assert_eq!(crypt_hash("input password: \n"), None);
    }

    #[tokio::test]
    async fn failed_reset_is_still_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let history = Arc::new(HistoryLog::new(dir.path().join("h.json"), 100));
        let broker = Arc::new(InProcessBroker::new(Arc::new(OpExecutor::new(runner.clone()))));
        let controller = EnrollmentController::new(broker, runner, history.clone(), vec![], Duration::from_secs(5));

        let err = controller.reset(&EnrollmentSecret::RootPassword).await.unwrap_err();
        assert!(matches!(err, TrustError::ToolMissing { .. }));
        let entry = &history.entries().await[0];
        assert_eq!(entry.action, HistoryAction::ResetKeys);
        assert!(!entry.success);
        assert!(entry.details["error"].as_str().unwrap().contains("mokutil"));
    }

    #[tokio::test]
    async fn import_without_certificate_is_key_missing() {
        let f = fixture("", "");
        let mut identity = f.identity.clone();
        identity.cert_der_path = identity.cert_der_path.with_extension("missing");
        let err = f
            .controller
            .import(&identity, &EnrollmentSecret::RootPassword)
            .await
            .unwrap_err();
        assert!(matches!(err, TrustError::KeyMissing { .. }));
        assert!(f.runner.calls_to("mokutil").is_empty());
    }
}
