// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Postgres boundary.
//!
//! Everything the backend asks of the database sits behind one trait so
//! admission and game submission are testable against a fake. Reads
//! used during admission degrade to "no record" at the call sites; an
//! update touching an unexpected number of rows surfaces as
//! [`DbError::SusTag`].

use ah_core::report::GraphFrame;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("unexpected row count {0}")]
    SusTag(u64),
}

/// The ban row joined with the identity's account, if any. A `None`
/// lookup result means the identity has never been seen.
#[derive(Debug, Clone, Default)]
pub struct BanRecord {
    pub account: Option<i64>,
    pub ban_id: Option<i64>,
    pub issued: Option<DateTime<Utc>>,
    pub expires: Option<DateTime<Utc>>,
    pub expired: bool,
    pub reason: Option<String>,
    pub forbids_joining: bool,
    pub forbids_playing: bool,
    pub forbids_chatting: bool,
}

impl BanRecord {
    /// Whether an unexpired ban is attached to this record.
    pub fn active(&self) -> bool {
        self.ban_id.is_some() && !self.expired
    }
}

/// One `games` row to create at first report.
#[derive(Debug, Clone, Default)]
pub struct NewGame {
    pub version: String,
    pub instance_id: i64,
    pub setting_scavs: i64,
    pub setting_alliance: i64,
    pub setting_power: i64,
    pub setting_base: i64,
    pub map_name: String,
    pub map_hash: String,
    pub mods: String,
    pub display_category: i64,
    pub players: Vec<NewPlayer>,
    pub rating_categories: Vec<i64>,
}

#[derive(Debug, Clone)]
pub struct NewPlayer {
    pub name: String,
    pub pubkey: Vec<u8>,
    pub position: i64,
    pub team: i64,
    pub color: i64,
    pub props: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct FinalPlayer {
    pub position: i64,
    pub usertype: String,
    pub props: serde_json::Value,
}

#[derive(Debug, Clone, Default)]
pub struct GameFinalization {
    pub research_log: serde_json::Value,
    pub end_date_ms: i64,
    pub debug_triggered: bool,
    pub game_time: i64,
    pub players: Vec<FinalPlayer>,
}

/// Outcome of an identity-link confirmation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkOutcome {
    #[default]
    Linked,
    CodeNotFound,
    AlreadyClaimed,
    /// Linking further identities is only allowed before any games are
    /// recorded on them.
    HasPlayedGames,
}

#[async_trait]
pub trait Database: Send + Sync {
    /// Latest ban (with the identity's account) for a public key.
    async fn ban_lookup(&self, pubkey: &[u8]) -> Result<Option<BanRecord>, DbError>;

    /// Short games (< 60 s) by this identity or account inside the
    /// anti-spam window.
    async fn leaver_count(
        &self,
        pubkey: &[u8],
        account: Option<i64>,
        window_hours: i64,
    ) -> Result<i64, DbError>;

    /// Fill in `identities.pkey` for rows previously known by hash only.
    async fn discover_pubkey(&self, pubkey: &[u8]) -> Result<(), DbError>;

    /// Record an automatic moderation action under its event code.
    async fn log_action(&self, code: &str, description: &str) -> Result<(), DbError>;

    /// Identity hashes of accounts allowed to administrate rooms.
    async fn fetch_moderator_hashes(&self) -> Result<Vec<String>, DbError>;

    async fn add_chat_log(
        &self,
        ip: &str,
        name: &str,
        pubkey: &[u8],
        message: &str,
    ) -> Result<(), DbError>;

    /// First report of a game: insert the games row, upsert player
    /// identities, insert players and rating-category joins. Returns
    /// the new game id.
    async fn begin_game(&self, game: &NewGame) -> Result<i64, DbError>;

    /// Append one graph frame to `games.graphs`.
    async fn append_frame(&self, game_id: i64, frame: &GraphFrame) -> Result<(), DbError>;

    /// Final report: per-player usertype/props plus game end columns.
    async fn finalize_game(&self, game_id: i64, fin: &GameFinalization) -> Result<(), DbError>;

    /// Store the zstd-compressed replay on the games row.
    async fn store_replay(&self, game_id: i64, replay_zstd: &[u8]) -> Result<(), DbError>;

    /// Claim an identity for the account owning `code`.
    async fn link_identity(
        &self,
        pubkey: &[u8],
        name: &str,
        code: &str,
    ) -> Result<LinkOutcome, DbError>;
}

pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(conn_string: &str) -> Result<PgDatabase, DbError> {
        let pool = PgPoolOptions::new().connect(conn_string).await?;
        Ok(PgDatabase { pool })
    }

    pub fn from_pool(pool: PgPool) -> PgDatabase {
        PgDatabase { pool }
    }
}

#[async_trait]
impl Database for PgDatabase {
    async fn ban_lookup(&self, pubkey: &[u8]) -> Result<Option<BanRecord>, DbError> {
        let row = sqlx::query(
            r#"select
    identities.account, bans.id, time_issued, time_expires,
    coalesce(time_expires < now(), 'false') as expired,
    reason, forbids_joining, forbids_playing, forbids_chatting
from identities
left outer join bans on bans.identity = identities.id or bans.account = identities.account
where
    identities.hash = encode(sha256($1), 'hex')
order by time_expires desc
limit 1"#,
        )
        .bind(pubkey)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(BanRecord {
            account: row.try_get("account")?,
            ban_id: row.try_get("id")?,
            issued: row.try_get("time_issued")?,
            expires: row.try_get("time_expires")?,
            expired: row.try_get("expired")?,
            reason: row.try_get("reason")?,
            forbids_joining: row.try_get::<Option<bool>, _>("forbids_joining")?.unwrap_or(false),
            forbids_playing: row.try_get::<Option<bool>, _>("forbids_playing")?.unwrap_or(false),
            forbids_chatting: row
                .try_get::<Option<bool>, _>("forbids_chatting")?
                .unwrap_or(false),
        }))
    }

    async fn leaver_count(
        &self,
        pubkey: &[u8],
        account: Option<i64>,
        window_hours: i64,
    ) -> Result<i64, DbError> {
        let row = sqlx::query(
            r#"select
    count(g.id)
from games as g
join players as p on p.game = g.id
join identities as i on p.identity = i.id
left join accounts as a on i.account = a.id
where g.game_time < 60000
  and g.time_started + $1::interval > now()
  and (i.pkey = $2 or a.id = coalesce($3, -1))"#,
        )
        .bind(format!("{window_hours} hours"))
        .bind(pubkey)
        .bind(account)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<i64, _>(0)?)
    }

    async fn discover_pubkey(&self, pubkey: &[u8]) -> Result<(), DbError> {
        let result = sqlx::query(
            "update identities set pkey = $1 where hash = encode(sha256($1), 'hex') and pkey is null",
        )
        .bind(pubkey)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() > 1 {
            return Err(DbError::SusTag(result.rows_affected()));
        }
        Ok(())
    }

    async fn log_action(&self, code: &str, description: &str) -> Result<(), DbError> {
        sqlx::query("insert into event_log (code, description) values ($1, $2)")
            .bind(code)
            .bind(description)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn fetch_moderator_hashes(&self) -> Result<Vec<String>, DbError> {
        let rows = sqlx::query(
            r#"select
    hash
from identities
join accounts on identities.account = accounts.id
where accounts.allow_host_request = true and pkey is not null"#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| r.try_get::<String, _>("hash").map_err(DbError::from))
            .collect()
    }

    async fn add_chat_log(
        &self,
        ip: &str,
        name: &str,
        pubkey: &[u8],
        message: &str,
    ) -> Result<(), DbError> {
        let result =
            sqlx::query("INSERT INTO chatlog (ip, name, pkey, msg) VALUES ($1, $2, $3, $4)")
                .bind(ip)
                .bind(name)
                .bind(pubkey)
                .bind(message)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() != 1 {
            return Err(DbError::SusTag(result.rows_affected()));
        }
        Ok(())
    }

    async fn begin_game(&self, game: &NewGame) -> Result<i64, DbError> {
        let mut tx = self.pool.begin().await?;
        let gid: i64 = sqlx::query(
            r#"insert into games (version, instance,
    setting_scavs, setting_alliance, setting_power, setting_base,
    map_name, map_hash, mods, display_category) values ($1, $2,
    $3, $4, $5, $6,
    $7, $8, $9, $10) returning id"#,
        )
        .bind(&game.version)
        .bind(game.instance_id)
        .bind(game.setting_scavs)
        .bind(game.setting_alliance)
        .bind(game.setting_power)
        .bind(game.setting_base)
        .bind(&game.map_name)
        .bind(&game.map_hash)
        .bind(&game.mods)
        .bind(game.display_category)
        .fetch_one(&mut *tx)
        .await?
        .try_get("id")?;

        for player in &game.players {
            let identity: i64 = sqlx::query(
                r#"insert into identities (name, pkey, hash) values
    ($1, $2, encode(sha256($2), 'hex'))
    on conflict (hash) do update set name = $1, pkey = $2 returning id"#,
            )
            .bind(&player.name)
            .bind(&player.pubkey)
            .fetch_one(&mut *tx)
            .await?
            .try_get("id")?;

            sqlx::query(
                r#"insert into players (game, identity, position, team, color, props) values
    ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(gid)
            .bind(identity)
            .bind(player.position)
            .bind(player.team)
            .bind(player.color)
            .bind(&player.props)
            .execute(&mut *tx)
            .await?;
        }

        for category in &game.rating_categories {
            sqlx::query("insert into games_rating_categories (game, category) values ($1, $2)")
                .bind(gid)
                .bind(category)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(gid)
    }

    async fn append_frame(&self, game_id: i64, frame: &GraphFrame) -> Result<(), DbError> {
        let frame_json = serde_json::to_value(frame).unwrap_or_default();
        let result = sqlx::query(
            "update games set graphs = coalesce(graphs, '[]'::json)::jsonb || $1::jsonb where id = $2",
        )
        .bind(frame_json)
        .bind(game_id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Err(DbError::SusTag(result.rows_affected()));
        }
        Ok(())
    }

    async fn finalize_game(&self, game_id: i64, fin: &GameFinalization) -> Result<(), DbError> {
        let mut tx = self.pool.begin().await?;
        for player in &fin.players {
            sqlx::query(
                "update players set usertype = $1, props = $2 where game = $3 and position = $4",
            )
            .bind(&player.usertype)
            .bind(&player.props)
            .bind(game_id)
            .bind(player.position)
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(
            r#"update games set research_log = $1,
    time_ended = TO_TIMESTAMP($2::double precision / 1000),
    debug_triggered = $3, game_time = $4 where id = $5"#,
        )
        .bind(&fin.research_log)
        .bind(fin.end_date_ms)
        .bind(fin.debug_triggered)
        .bind(fin.game_time)
        .bind(game_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn store_replay(&self, game_id: i64, replay_zstd: &[u8]) -> Result<(), DbError> {
        let result = sqlx::query("update games set replay = $1 where id = $2")
            .bind(replay_zstd)
            .bind(game_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() != 1 {
            return Err(DbError::SusTag(result.rows_affected()));
        }
        Ok(())
    }

    async fn link_identity(
        &self,
        pubkey: &[u8],
        name: &str,
        code: &str,
    ) -> Result<LinkOutcome, DbError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("LOCK TABLE accounts IN ACCESS EXCLUSIVE MODE").execute(&mut *tx).await?;
        sqlx::query("LOCK TABLE identities IN ACCESS EXCLUSIVE MODE").execute(&mut *tx).await?;
        sqlx::query("LOCK TABLE players IN EXCLUSIVE MODE").execute(&mut *tx).await?;

        let code_account: Option<i64> =
            sqlx::query("SELECT id FROM accounts WHERE wz_confirm_code = $1")
                .bind(code)
                .fetch_optional(&mut *tx)
                .await?
                .map(|r| r.try_get("id"))
                .transpose()?;
        let Some(code_account) = code_account else {
            tx.rollback().await?;
            return Ok(LinkOutcome::CodeNotFound);
        };

        let account_ident_count: i64 =
            sqlx::query("SELECT count(*) FROM identities WHERE account = $1")
                .bind(code_account)
                .fetch_one(&mut *tx)
                .await?
                .try_get(0)?;

        let identity = sqlx::query(
            "SELECT id, account FROM identities WHERE hash = encode(sha256($1), 'hex')",
        )
        .bind(pubkey)
        .fetch_optional(&mut *tx)
        .await?;
        let mut ident_id: Option<i64> = None;
        if let Some(row) = identity {
            if row.try_get::<Option<i64>, _>("account")?.is_some() {
                tx.rollback().await?;
                return Ok(LinkOutcome::AlreadyClaimed);
            }
            ident_id = Some(row.try_get("id")?);
        }

        // Only first-linked identities may carry game history.
        if let Some(ident_id) = ident_id {
            if account_ident_count != 0 {
                let played: i64 =
                    sqlx::query("SELECT count(*) FROM players WHERE identity = $1")
                        .bind(ident_id)
                        .fetch_one(&mut *tx)
                        .await?
                        .try_get(0)?;
                if played > 0 {
                    tx.rollback().await?;
                    return Ok(LinkOutcome::HasPlayedGames);
                }
            }
        }

        let result = sqlx::query(
            r#"insert into identities (name, pkey, hash, account)
    values ($1, $2, encode(sha256($2), 'hex'), $3)
    on conflict (hash) do update set account = $3
    where identities.account is null and identities.pkey = $2"#,
        )
        .bind(name)
        .bind(pubkey)
        .bind(code_account)
        .execute(&mut *tx)
        .await?;
        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(LinkOutcome::AlreadyClaimed);
        }

        sqlx::query("update accounts set wz_confirm_code = null, display_name = $1 where id = $2")
            .bind(name)
            .bind(code_account)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(LinkOutcome::Linked)
    }
}
