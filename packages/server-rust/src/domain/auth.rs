//! Account and user authentication handlers.
//!
//! Outcomes that the client caused (unknown name, wrong password) are
//! semantic results sent as `*_error` events; only infrastructure failures
//! propagate as handler errors.

use async_trait::async_trait;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tilemud_core::messages::{
    SignInAccount, SignInByToken, SignInError, SignInUser, SignUpAccount, SignUpUser, TokenData,
    UserList, UserListEntry,
};
use tilemud_core::{codes, SyncOp, Vec2};

use crate::network::{EventContext, EventHandler, HandlerError, Outcome};
use crate::world::entity::{Ref, Stored};
use crate::world::{Account, Location, User};
use crate::storage::{SelectOptions, WhereClause};

/// Where fresh users appear.
const START_LOCATION: i64 = 1;
const START_POSITION: Vec2 = Vec2 { x: 5, y: 4 };

fn valid_name(name: &str) -> bool {
    (3..=20).contains(&name.chars().count())
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

fn valid_mail(mail: &str) -> bool {
    mail.len() <= 254 && mail.contains('@') && !mail.starts_with('@') && !mail.ends_with('@')
}

fn valid_pass(pass: &str) -> bool {
    (8..=64).contains(&pass.len())
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0_u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Hex sha-256 of salt + password.
fn hash_password(salt: &str, pass: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(pass.as_bytes());
    hex::encode(hasher.finalize())
}

/// Constant-time comparison so timing does not leak hash prefixes.
fn verify_password(salt: &str, pass: &str, expected_hash: &str) -> bool {
    hash_password(salt, pass)
        .as_bytes()
        .ct_eq(expected_hash.as_bytes())
        .into()
}

/// `sign_up_account`: create the account and its persistent token.
pub struct SignUpAccountHandler;

#[async_trait]
impl EventHandler for SignUpAccountHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: SignUpAccount = ctx.parse()?;
        if !valid_name(&data.name) || !valid_mail(&data.mail) || !valid_pass(&data.pass) {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let taken = engine
            .world
            .find_one::<Account>(&[WhereClause::eq("name", data.name.as_str())])
            .await?
            .is_some();
        if taken {
            engine.send(
                ctx.socket,
                "sign_up_account_error",
                &SignInError { error: codes::AUTH_NAME_TAKEN.to_string() },
            );
            return Ok(Outcome::Consumed);
        }

        let mut account = Account::stub(0);
        account.meta_mut().initialized = true;
        account.name = data.name;
        account.mail = data.mail;
        account.salt = random_hex(16);
        account.pass_hash = hash_password(&account.salt, &data.pass);
        // 48 random bytes, 96 hex characters.
        account.token = random_hex(48);
        engine.world.create(account);
        // Persist immediately so the account can sign in without waiting
        // for the next scheduled flush.
        engine.world.flush().await?;

        engine.send_empty(ctx.socket, "sign_up_account");
        Ok(Outcome::Consumed)
    }
}

/// `sign_in_account`: bind the socket to an account by credentials.
pub struct SignInAccountHandler;

#[async_trait]
impl EventHandler for SignInAccountHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: SignInAccount = ctx.parse()?;
        if data.name.is_empty() || data.pass.is_empty() {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let Some(account) = engine
            .world
            .find_one::<Account>(&[WhereClause::eq("name", data.name.as_str())])
            .await?
        else {
            engine.send(
                ctx.socket,
                "sign_in_account_error",
                &SignInError { error: codes::AUTH_ACCOUNT_NOT_FOUND.to_string() },
            );
            return Ok(Outcome::Consumed);
        };

        let (id, token, ok) = {
            let account = account.read();
            (
                account.id(),
                account.token.clone(),
                verify_password(&account.salt, &data.pass, &account.pass_hash),
            )
        };
        if !ok {
            engine.send(
                ctx.socket,
                "sign_in_account_error",
                &SignInError { error: codes::AUTH_WRONG_PASSWORD.to_string() },
            );
            return Ok(Outcome::Consumed);
        }

        engine.sessions.log_in_account(ctx.socket, id);
        engine.send(ctx.socket, "sign_in_account", &TokenData { token });
        Ok(Outcome::Consumed)
    }
}

/// `sign_in_by_token`: restore an account session from the stored token.
pub struct SignInByTokenHandler;

#[async_trait]
impl EventHandler for SignInByTokenHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: SignInByToken = ctx.parse()?;
        if data.token.len() != 96 || !data.token.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let Some(account) = engine
            .world
            .find_one::<Account>(&[WhereClause::eq("token", data.token.as_str())])
            .await?
        else {
            engine.send(
                ctx.socket,
                "sign_in_by_token_error",
                &SignInError { error: codes::AUTH_WRONG_TOKEN.to_string() },
            );
            return Ok(Outcome::Consumed);
        };

        engine.sessions.log_in_account(ctx.socket, account.read().id());
        engine.send_empty(ctx.socket, "sign_in_by_token");
        Ok(Outcome::Consumed)
    }
}

/// `sign_up_user`: create an avatar under the signed-in account.
pub struct SignUpUserHandler;

#[async_trait]
impl EventHandler for SignUpUserHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: SignUpUser = ctx.parse()?;
        if !valid_name(&data.name) {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let account_id = engine
            .sessions
            .account_by_socket(ctx.socket)
            .ok_or_else(|| HandlerError::Internal(anyhow::anyhow!("access checked")))?;

        let taken = engine
            .world
            .find_one::<User>(&[WhereClause::eq("name", data.name.as_str())])
            .await?
            .is_some();
        if taken {
            engine.send(
                ctx.socket,
                "sign_up_user_error",
                &SignInError { error: codes::AUTH_NAME_TAKEN.to_string() },
            );
            return Ok(Outcome::Consumed);
        }

        let account = engine.world.get_or_fail::<Account>(account_id).await?;
        let location = engine.world.get_or_fail::<Location>(START_LOCATION).await?;
        engine
            .world
            .create(User::new(data.name, account, location, START_POSITION));
        engine.world.flush().await?;

        engine.send_empty(ctx.socket, "sign_up_user");
        Ok(Outcome::Consumed)
    }
}

/// `sign_in_user`: place the avatar in the world and run its first load.
pub struct SignInUserHandler;

#[async_trait]
impl EventHandler for SignInUserHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let data: SignInUser = ctx.parse()?;
        if data.name.is_empty() {
            return Err(HandlerError::Validation);
        }

        let engine = &ctx.engine;
        let account_id = engine
            .sessions
            .account_by_socket(ctx.socket)
            .ok_or_else(|| HandlerError::Internal(anyhow::anyhow!("access checked")))?;

        let Some(user) = engine
            .world
            .find_one::<User>(&[
                WhereClause::eq("name", data.name.as_str()),
                WhereClause::eq("account_id", account_id),
            ])
            .await?
        else {
            engine.send(
                ctx.socket,
                "sign_in_user_error",
                &SignInError { error: codes::AUTH_USER_NOT_FOUND.to_string() },
            );
            return Ok(Outcome::Consumed);
        };

        let (user_id, location_id) = {
            let user = user.read();
            (user.id(), user.location.key().unwrap_or(START_LOCATION))
        };
        // Resolve the location to the canonical instance before the user
        // becomes visible.
        let location = engine.world.get_or_fail::<Location>(location_id).await?;
        user.write().location = Ref::resolved(location);

        let was_online = engine.sessions.is_user_online(user_id);
        engine.sessions.log_in_user(ctx.socket, user_id);

        let user_ref = User::wrap(user);
        engine.synchronizer.first_load(&user_ref).await?;
        if !was_online {
            // Enter the zone and tell the neighborhood.
            engine.synchronizer.announce(&user_ref, SyncOp::Create).await;
        }

        engine.send_empty(ctx.socket, "sign_in_user");
        Ok(Outcome::Consumed)
    }
}

/// `get_user_list`: the account's avatars.
pub struct GetUserListHandler;

#[async_trait]
impl EventHandler for GetUserListHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        let engine = &ctx.engine;
        let account_id = engine
            .sessions
            .account_by_socket(ctx.socket)
            .ok_or_else(|| HandlerError::Internal(anyhow::anyhow!("access checked")))?;

        let users = engine
            .world
            .load_where::<User>(
                &[WhereClause::eq("account_id", account_id)],
                &SelectOptions { order_by: Some("id".into()), limit: None },
            )
            .await?;
        let users = users
            .iter()
            .map(|handle| {
                let user = handle.read();
                UserListEntry { id: user.id(), name: user.name.clone() }
            })
            .collect();

        engine.send(ctx.socket, "get_user_list", &UserList { users });
        Ok(Outcome::Consumed)
    }
}

/// `log_out_user`: back to the user-selection state.
pub struct LogOutUserHandler;

#[async_trait]
impl EventHandler for LogOutUserHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        ctx.engine.sign_out_user(ctx.socket).await;
        ctx.engine.send_empty(ctx.socket, "log_out_user");
        Ok(Outcome::Consumed)
    }
}

/// `log_out_account`: drop both session slots.
pub struct LogOutAccountHandler;

#[async_trait]
impl EventHandler for LogOutAccountHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        ctx.engine.sign_out_user(ctx.socket).await;
        ctx.engine.sessions.log_out_account(ctx.socket);
        ctx.engine.send_empty(ctx.socket, "log_out_account");
        Ok(Outcome::Consumed)
    }
}

/// `ping`: heartbeat with the server time.
pub struct PingHandler;

#[async_trait]
impl EventHandler for PingHandler {
    async fn handle(&self, ctx: EventContext) -> Result<Outcome, HandlerError> {
        ctx.engine.send(
            ctx.socket,
            "pong",
            &tilemud_core::messages::Pong { server_time: super::now_ms() },
        );
        Ok(Outcome::Consumed)
    }
}
