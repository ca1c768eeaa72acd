//! AWS account identity and the account guard

use super::context::AwsContext;
use anyhow::{Context, Result, bail};
use tracing::info;

/// 12-digit AWS account ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display, derive_more::Deref)]
pub struct AccountId(String);

impl AccountId {
    #[cfg(test)]
    pub fn new(s: impl Into<String>) -> Self {
        AccountId(s.into())
    }

    pub fn matches(&self, expected: &str) -> bool {
        self.0 == expected.trim()
    }
}

/// Fetch the account the active credentials belong to (STS GetCallerIdentity)
pub async fn get_current_account_id(ctx: &AwsContext) -> Result<AccountId> {
    let identity = ctx
        .sts_client()
        .get_caller_identity()
        .send()
        .await
        .context("Failed to get AWS caller identity - check credentials")?;

    let account = identity
        .account()
        .context("No account ID returned from STS GetCallerIdentity")?;

    info!(account_id = %account, "AWS account validated");

    Ok(AccountId(account.to_string()))
}

/// Refuse to touch an account other than the configured one
pub async fn verify_account(ctx: &AwsContext, expected: &str) -> Result<AccountId> {
    let account = get_current_account_id(ctx).await?;
    check_account(&account, expected)?;
    Ok(account)
}

fn check_account(actual: &AccountId, expected: &str) -> Result<()> {
    if !actual.matches(expected) {
        bail!(
            "Credentials belong to account {actual}, but the deployment is configured for account {}",
            expected.trim()
        );
    }
    Ok(())
}
