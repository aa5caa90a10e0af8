//! Client for the trusted encryption service (TES).
//!
//! Per endpoint-scope the session walks
//! `Unauthenticated -> Challenging -> Authenticated -> Expired -> Challenging`.
//! The challenge exchange runs through the task serializer under a fixed key,
//! so concurrent callers never race overlapping challenges; queued callers
//! re-check the session before re-challenging. Every remote operation is
//! wrapped in bounded exponential backoff. `sync_with_tes` alone degrades on
//! exhausted retries instead of propagating, echoing `from_block` so the
//! caller never advances its cursor on failure.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use veilnet::HttpClient;

use crate::auth::{encode_auth_token, Session};
use crate::config::SdkConfig;
use crate::error::{Result, SdkError};
use crate::events::{SyncFailure, SyncFailureSender};
use crate::keys::ViewAccount;
use crate::serializer::TaskSerializer;
use crate::sync::cmp_blocks;

const CSRF_HEADER: &str = "x-csrf-token";

#[derive(Debug, Deserialize)]
struct ChallengeInitResponse {
    random: String,
}

#[derive(Debug, Deserialize)]
struct ChallengeSolveResponse {
    /// Unix seconds.
    exp: u64,
    csrf: String,
}

#[derive(Debug, Deserialize)]
struct TepkResponse {
    tepk: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DecryptRequest<'a> {
    block: &'a str,
    token: &'a str,
    poseidon_hash: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DecryptResponse {
    decrypted_commitment: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TesEventKind {
    /// A commitment decrypted to this owner.
    Added,
    /// A commitment left the on-chain set (spent or withdrawn).
    Removed,
}

/// One on-chain note event as reported by the indexer. Returned in whatever
/// order the remote side produced; see [`sort_events`] for the canonical
/// replay order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TesEvent {
    pub kind: TesEventKind,
    pub hash: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub s_value: Option<String>,
    pub block_number: String,
    pub transaction_index: u64,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    pub events: Vec<TesEvent>,
    pub synced_block: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub gas_price: String,
    pub paymaster_address: String,
    pub sponsored_vault_methods: Vec<String>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaTransaction {
    pub to: String,
    pub data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteRequest<'a> {
    metatxs: &'a [MetaTransaction],
    covered_gas: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UserPublicKeyResponse {
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct DecoyRecipientResponse {
    recipient: String,
}

/// Canonical replay order: descending block number, then descending
/// transaction index.
pub fn sort_events(events: &mut [TesEvent]) {
    events.sort_by(|a, b| {
        cmp_blocks(&b.block_number, &a.block_number)
            .then_with(|| b.transaction_index.cmp(&a.transaction_index))
    });
}

pub struct TesClient {
    http: Arc<HttpClient>,
    base_url: String,
    view: Arc<ViewAccount>,
    serializer: Arc<TaskSerializer>,
    session: Arc<RwLock<Session>>,
    retry_attempts: u32,
    retry_base_delay: Duration,
    task_timeout: Duration,
    failure_sink: Option<SyncFailureSender>,
}

impl TesClient {
    pub fn new(
        config: &SdkConfig,
        view: Arc<ViewAccount>,
        serializer: Arc<TaskSerializer>,
    ) -> Result<Self> {
        let http = HttpClient::new(veilnet::Config::default())?;
        Ok(Self {
            http: Arc::new(http),
            base_url: config.tes_url.trim_end_matches('/').to_string(),
            view,
            serializer,
            session: Arc::new(RwLock::new(Session::default())),
            retry_attempts: config.retry_attempts.max(1),
            retry_base_delay: config.retry_base_delay,
            task_timeout: config.task_timeout,
            failure_sink: None,
        })
    }

    /// Attaches the sink that receives degraded-sync reports.
    pub fn with_failure_sink(mut self, sink: SyncFailureSender) -> Self {
        self.failure_sink = Some(sink);
        self
    }

    fn auth_queue_key(&self) -> String {
        format!("tes-auth:{}", self.view.view_address)
    }

    /// Ensures a live session and returns its csrf token. The challenge
    /// sequence is serialized under a fixed per-scope key; only one
    /// challenge is ever in flight.
    pub async fn manage_auth(&self) -> Result<String> {
        {
            let session = self.session.read().await;
            if session.is_valid() {
                return Ok(session.csrf.clone());
            }
        }

        let http = self.http.clone();
        let base_url = self.base_url.clone();
        let view = self.view.clone();
        let session = self.session.clone();

        self.serializer
            .schedule(
                &self.auth_queue_key(),
                async move {
                    // A caller queued behind the refresh reuses its result.
                    {
                        let current = session.read().await;
                        if current.is_valid() {
                            return Ok(current.csrf.clone());
                        }
                    }

                    let init: ChallengeInitResponse = http
                        .get_json(
                            &format!("{}/challenge/init/{}", base_url, view.view_address),
                            &[],
                        )
                        .await?;
                    let nonce = hex::decode(init.random.trim_start_matches("0x")).map_err(|e| {
                        SdkError::Auth(format!("Bad challenge nonce '{}': {}", init.random, e))
                    })?;

                    let nonce_signature = view.sign_nonce(&nonce)?;
                    let token = encode_auth_token(
                        &view.view_address,
                        &nonce_signature,
                        &view.main_address,
                        &view.delegation_signature,
                    )?;
                    let bearer = format!("Bearer {}", token);

                    let solved: ChallengeSolveResponse = http
                        .get_json(
                            &format!("{}/challenge/solve", base_url),
                            &[("Authorization", bearer.as_str())],
                        )
                        .await?;

                    let refreshed = Session::new(solved.csrf.clone(), solved.exp * 1000);
                    *session.write().await = refreshed;
                    info!(view = %view.view_address, "TES session refreshed");
                    Ok(solved.csrf)
                },
                "manage-auth",
                self.task_timeout,
            )
            .await
    }

    async fn with_retry<'a, T>(
        &self,
        op_name: &str,
        mut op: impl FnMut() -> BoxFuture<'a, Result<T>>,
    ) -> Result<T> {
        let mut delay = self.retry_base_delay;
        let mut last_error = String::new();

        for attempt in 1..=self.retry_attempts {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    warn!(op_name, attempt, error = %e, "TES call failed");
                    last_error = e.to_string();
                }
            }
            if attempt < self.retry_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        Err(SdkError::RemoteUnavailable {
            attempts: self.retry_attempts,
            last_error,
        })
    }

    /// Asks the TES to decrypt one on-chain commitment.
    pub async fn decrypt(&self, block: &str, token: &str, poseidon_hash: &str) -> Result<String> {
        self.with_retry("decrypt", || {
            Box::pin(async move {
                let csrf = self.manage_auth().await?;
                let body = DecryptRequest {
                    block,
                    token,
                    poseidon_hash,
                };
                let response: DecryptResponse = self
                    .http
                    .post_json(
                        &format!("{}/encryption/decrypt", self.base_url),
                        &body,
                        &[(CSRF_HEADER, &csrf)],
                    )
                    .await?;
                Ok(response.decrypted_commitment)
            })
        })
        .await
    }

    /// Pulls note events in `[from_block, to_block]`. On exhausted retries
    /// this degrades instead of failing: the error goes to the sink and the
    /// caller gets back `from_block` with no events, so sync cursors never
    /// advance on failure and callers never crash.
    pub async fn sync_with_tes(
        &self,
        owner: &str,
        token: &str,
        from_block: &str,
        to_block: &str,
    ) -> Result<SyncResponse> {
        let attempt = self
            .with_retry("sync_with_tes", || {
                Box::pin(async move {
                    let csrf = self.manage_auth().await?;
                    let url = format!(
                        "{}/indexer?owner={}&token={}&fromBlock={}&toBlock={}",
                        self.base_url, owner, token, from_block, to_block
                    );
                    let response: SyncResponse =
                        self.http.get_json(&url, &[(CSRF_HEADER, &csrf)]).await?;
                    Ok(response)
                })
            })
            .await;

        match attempt {
            Ok(response) => Ok(response),
            Err(e) => {
                warn!(owner, token, from_block, to_block, error = %e, "Sync degraded");
                if let Some(sink) = &self.failure_sink {
                    let _ = sink.send(SyncFailure {
                        owner: owner.to_string(),
                        token: token.to_string(),
                        from_block: from_block.to_string(),
                        to_block: to_block.to_string(),
                        error: e.to_string(),
                    });
                }
                Ok(SyncResponse {
                    events: Vec::new(),
                    synced_block: from_block.to_string(),
                })
            }
        }
    }

    /// Gas sponsorship quote for a token.
    pub async fn quote(&self, token: &str) -> Result<QuoteResponse> {
        self.with_retry("quote", || {
            Box::pin(async move {
                let csrf = self.manage_auth().await?;
                self.http
                    .get_json(
                        &format!("{}/paymaster/quote/{}", self.base_url, token),
                        &[(CSRF_HEADER, &csrf)],
                    )
                    .await
                    .map_err(SdkError::from)
            })
        })
        .await
    }

    pub async fn execute_meta_transactions(
        &self,
        metatxs: &[MetaTransaction],
        covered_gas: &str,
    ) -> Result<ExecuteResponse> {
        self.with_retry("execute_meta_transactions", || {
            Box::pin(async move {
                let csrf = self.manage_auth().await?;
                let body = ExecuteRequest {
                    metatxs,
                    covered_gas,
                };
                self.http
                    .post_json(
                        &format!("{}/paymaster/execute", self.base_url),
                        &body,
                        &[(CSRF_HEADER, &csrf)],
                    )
                    .await
                    .map_err(SdkError::from)
            })
        })
        .await
    }

    /// The service's encryption public key (tepk).
    pub async fn get_encryption_public_key(&self) -> Result<String> {
        self.with_retry("get_encryption_public_key", || {
            Box::pin(async move {
                let csrf = self.manage_auth().await?;
                let response: TepkResponse = self
                    .http
                    .get_json(
                        &format!("{}/encryption/tepk", self.base_url),
                        &[(CSRF_HEADER, &csrf)],
                    )
                    .await?;
                Ok(response.tepk)
            })
        })
        .await
    }

    pub async fn get_user_public_key(&self, address: &str) -> Result<String> {
        self.with_retry("get_user_public_key", || {
            Box::pin(async move {
                let csrf = self.manage_auth().await?;
                let response: UserPublicKeyResponse = self
                    .http
                    .get_json(
                        &format!("{}/userMetadata/publicKey/{}", self.base_url, address),
                        &[(CSRF_HEADER, &csrf)],
                    )
                    .await?;
                Ok(response.public_key)
            })
        })
        .await
    }

    pub async fn get_decoy_recipient(&self, amount: &str) -> Result<String> {
        self.with_retry("get_decoy_recipient", || {
            Box::pin(async move {
                let csrf = self.manage_auth().await?;
                let response: DecoyRecipientResponse = self
                    .http
                    .get_json(
                        &format!("{}/userMetadata/decoyRecipient?amount={}", self.base_url, amount),
                        &[(CSRF_HEADER, &csrf)],
                    )
                    .await?;
                Ok(response.recipient)
            })
        })
        .await
    }
}
