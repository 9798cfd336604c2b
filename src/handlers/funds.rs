//! Deposit and withdraw handlers

use crate::amount::Amount;
use crate::erc20::TokenMetadataSource;
use crate::events::BlockContext;
use crate::metrics::effects::{ActivityDirection, MetricEffect};
use crate::store::{Store, StoreError};

use super::{load_or_create_account, load_or_create_token, load_or_create_user_token};

pub fn handle_deposit(
    store: &Store,
    metadata: &dyn TokenMetadataSource,
    token_addr: &str,
    account_addr: &str,
    amount: &Amount,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let (mut account, account_is_new) = load_or_create_account(store, account_addr, ctx)?;
    let (mut token, token_is_new) = load_or_create_token(store, metadata, token_addr, ctx)?;
    let (mut user_token, holder_is_new) = load_or_create_user_token(store, account_addr, token_addr)?;

    if holder_is_new {
        token.total_users += 1;
        account.total_tokens += 1;
    }

    user_token.funds += amount;
    token.user_funds += amount;
    token.total_deposits += amount;
    token.volume += amount;

    store.put_account(&account)?;
    store.put_token(&token)?;
    store.put_user_token(&user_token)?;

    Ok(vec![MetricEffect::TokenActivity {
        token: token_addr.to_string(),
        account: account_addr.to_string(),
        direction: ActivityDirection::Deposit,
        amount: amount.clone(),
        account_is_new,
        holder_is_new,
        token_is_new,
    }])
}

pub fn handle_withdraw(
    store: &Store,
    token_addr: &str,
    account_addr: &str,
    amount: &Amount,
    ctx: &BlockContext,
) -> Result<Vec<MetricEffect>, StoreError> {
    let Some(mut user_token) = store.get_user_token(account_addr, token_addr)? else {
        log::warn!(
            "withdraw at block {} for unknown user token ({}, {}), skipping",
            ctx.block_number,
            account_addr,
            token_addr
        );
        return Ok(Vec::new());
    };
    let Some(mut token) = store.get_token(token_addr)? else {
        log::warn!(
            "withdraw at block {} for unknown token {}, skipping",
            ctx.block_number,
            token_addr
        );
        return Ok(Vec::new());
    };

    // Funds may dip below zero transiently from settlement timing; tolerated,
    // never a panic.
    user_token.funds -= amount;
    token.user_funds -= amount;
    token.total_withdrawals += amount;
    token.volume += amount;

    store.put_token(&token)?;
    store.put_user_token(&user_token)?;

    Ok(vec![MetricEffect::TokenActivity {
        token: token_addr.to_string(),
        account: account_addr.to_string(),
        direction: ActivityDirection::Withdraw,
        amount: amount.clone(),
        account_is_new: false,
        holder_is_new: false,
        token_is_new: false,
    }])
}
