//! In-process protector.

use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tracing::{debug, instrument};

use super::{
    Decision, ProtectContext, ProtectError, Protector, RuleSet, bot,
    email::{EmailValidator, MxLookup},
    rate_limit::SlidingWindowLimiter,
    shield::Shield,
};

/// Runs shield, email, bot and rate-limit rules locally.
///
/// Rate-limit state lives in this process only; run one instance per
/// deployment or switch to the remote protector for shared counters.
pub struct LocalProtector {
    shield: Shield,
    email: EmailValidator,
    limiter: Arc<SlidingWindowLimiter>,
}

impl LocalProtector {
    /// # Errors
    /// Returns an error if the shield signatures or the email pattern fail to compile.
    pub fn new(mx: Arc<dyn MxLookup>) -> Result<Self, ProtectError> {
        let shield = Shield::new().map_err(|err| ProtectError::Config(err.to_string()))?;
        Ok(Self {
            shield,
            email: EmailValidator::new(mx)?,
            limiter: Arc::new(SlidingWindowLimiter::new()),
        })
    }

    /// Start the background sweep of idle rate-limit keys.
    pub fn spawn_sweeper(&self, period: Duration) {
        self.limiter.spawn_sweeper(period);
    }
}

#[async_trait]
impl Protector for LocalProtector {
    #[instrument(skip_all, fields(bucket = %rules.bucket))]
    async fn protect(
        &self,
        rules: &RuleSet,
        context: &ProtectContext,
    ) -> Result<Decision, ProtectError> {
        let mut results = Vec::with_capacity(4);
        results.push(self.shield.evaluate(&rules.shield, context));

        if let (Some(rule), Some(email)) = (rules.email.as_ref(), context.email.as_deref()) {
            results.push(self.email.evaluate(rule, email).await);
        }

        results.push(bot::evaluate(&rules.bot, context.user_agent.as_deref()));
        results.push(
            self.limiter
                .evaluate(&rules.bucket, &context.key, &rules.rate_limit),
        );

        let decision = Decision::from_results(results);
        debug!(
            "decision {} for {}: {:?}",
            decision.id, context.key, decision.conclusion
        );
        Ok(decision)
    }
}
