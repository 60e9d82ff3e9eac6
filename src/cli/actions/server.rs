use crate::{
    api::{
        self,
        admission::{
            Admission, AdmissionSettings,
            policy::{Policies, PolicyConfig},
            session::RemoteSessionLookup,
        },
        handlers::proxy::Upstream,
    },
    cli::commands::protector::ProtectorKind,
    protect::{LocalProtector, Protector, RemoteProtector, email::DnsMxLookup},
};
use anyhow::{Context, Result, anyhow};
use secrecy::SecretString;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};
use url::Url;

/// How often idle rate-limit keys are dropped by the local protector.
const SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub upstream_url: Url,
    pub session_url: Url,
    pub upstream_timeout: Duration,
    pub protector: ProtectorKind,
    pub protector_url: Option<String>,
    pub protector_key: Option<SecretString>,
    pub protector_timeout: Duration,
    pub policy: PolicyConfig,
    pub settings: AdmissionSettings,
}

/// Execute the server action.
/// # Errors
/// Returns an error if a client cannot be built or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    log_startup_args(&args);

    let upstream = Arc::new(
        Upstream::new(
            args.upstream_url,
            args.upstream_timeout,
            args.settings.body_limit,
        )
            .context("failed to build upstream client")?,
    );
    let sessions = Arc::new(
        RemoteSessionLookup::new(args.session_url, args.upstream_timeout)
            .context("failed to build session client")?,
    );

    let protector: Arc<dyn Protector> = match args.protector {
        ProtectorKind::Local => {
            let mx = Arc::new(DnsMxLookup::from_system()?);
            let local = LocalProtector::new(mx)?;
            local.spawn_sweeper(SWEEP_PERIOD);
            Arc::new(local)
        }
        ProtectorKind::Remote => {
            let url = args
                .protector_url
                .as_deref()
                .ok_or_else(|| anyhow!("protector URL is required for the remote protector"))?;
            let remote = RemoteProtector::new(url, args.protector_key, args.protector_timeout)?;
            debug!("remote decisions at {}", remote.decide_url());
            Arc::new(remote)
        }
    };

    let admission = Arc::new(Admission::new(
        Policies::from_config(&args.policy),
        protector,
        sessions,
        args.settings,
    ));

    api::new(args.port, admission, upstream).await
}

fn log_startup_args(args: &Args) {
    let protector = match args.protector {
        ProtectorKind::Local => "local".to_string(),
        ProtectorKind::Remote => format!(
            "remote ({})",
            args.protector_url.as_deref().unwrap_or_default()
        ),
    };
    info!(
        port = args.port,
        upstream = %args.upstream_url,
        session = %args.session_url,
        protector = %protector,
        mode = ?args.policy.mode,
        fail_mode = ?args.settings.fail_mode,
        sign_up_route = %args.settings.sign_up_route,
        "starting authgate"
    );
    debug!(
        "policies: strict {}/{:?}, relaxed {}/{:?}, bot allow {:?}, email block {:?}",
        args.policy.strict_max,
        args.policy.strict_interval,
        args.policy.relaxed_max,
        args.policy.relaxed_interval,
        args.policy.bot_allow,
        args.policy.email_block
    );
}
