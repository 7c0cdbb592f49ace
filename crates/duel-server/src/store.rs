//! SQLite-backed match-history store.
//!
//! Schema and query shapes are carried over from the original service this
//! server replaces: a `matches` table of one row per finished game and a
//! `players` table of running per-player aggregates, upserted on every
//! recorded match.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use duel_core::protocol::PlayerId;

#[derive(Debug, Serialize)]
pub struct Stats {
    pub total_matches: i64,
    pub total_players: i64,
    pub avg_match_duration: f64,
}

#[derive(Debug, Serialize)]
pub struct LeaderboardEntry {
    pub player_id: String,
    pub player_name: String,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub total_games: i64,
    pub win_rate: f64,
}

#[derive(Debug, Serialize)]
pub struct RecentMatch {
    pub id: i64,
    pub player1_id: String,
    pub player1_name: String,
    pub player2_id: String,
    pub player2_name: String,
    pub winner_id: Option<String>,
    pub start_time: i64,
    pub end_time: i64,
    pub turn_count: i64,
    pub deck1_id: String,
    pub deck2_id: String,
}

#[derive(Debug, Serialize)]
pub struct PlayerStats {
    pub player_id: String,
    pub player_name: String,
    pub total_games: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
    pub total_turns: i64,
    pub win_rate: f64,
}

/// Handle to the match-history database.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if absent) the SQLite database at `db_path`, enable
    /// WAL journalling, and run the schema migration.
    pub async fn open(db_path: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS matches (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                player1_id TEXT NOT NULL,
                player1_name TEXT NOT NULL,
                player2_id TEXT NOT NULL,
                player2_name TEXT NOT NULL,
                winner_id TEXT,
                start_time INTEGER NOT NULL,
                end_time INTEGER NOT NULL,
                turn_count INTEGER NOT NULL,
                deck1_id TEXT NOT NULL,
                deck2_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS players (
                player_id TEXT PRIMARY KEY,
                player_name TEXT NOT NULL,
                total_games INTEGER NOT NULL DEFAULT 0,
                wins INTEGER NOT NULL DEFAULT 0,
                losses INTEGER NOT NULL DEFAULT 0,
                draws INTEGER NOT NULL DEFAULT 0,
                total_turns INTEGER NOT NULL DEFAULT 0,
                last_seen INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        for (name, col) in [
            ("idx_matches_player1", "player1_id"),
            ("idx_matches_player2", "player2_id"),
            ("idx_matches_winner", "winner_id"),
            ("idx_matches_end_time", "end_time"),
        ] {
            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS {name} ON matches({col})"
            ))
            .execute(&pool)
            .await?;
        }

        Ok(Self { pool })
    }

    /// Append a finished match and upsert both players' running totals.
    ///
    /// Persistence failures are the caller's responsibility to log and
    /// swallow — they must never propagate into the live gameplay path.
    pub async fn record_match(
        &self,
        p1_id: PlayerId,
        p1_name: &str,
        p2_id: PlayerId,
        p2_name: &str,
        winner_id: Option<PlayerId>,
        start_time_ms: i64,
        end_time_ms: i64,
        turn_count: i64,
        deck1_id: &str,
        deck2_id: &str,
    ) -> anyhow::Result<()> {
        let now = now_secs();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO matches
                (player1_id, player1_name, player2_id, player2_name, winner_id,
                 start_time, end_time, turn_count, deck1_id, deck2_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(p1_id.to_string())
        .bind(p1_name)
        .bind(p2_id.to_string())
        .bind(p2_name)
        .bind(winner_id.map(|w| w.to_string()))
        .bind(start_time_ms)
        .bind(end_time_ms)
        .bind(turn_count)
        .bind(deck1_id)
        .bind(deck2_id)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        for (id, name) in [(p1_id, p1_name), (p2_id, p2_name)] {
            let (win, loss, draw) = match winner_id {
                None => (0, 0, 1),
                Some(w) if w == id => (1, 0, 0),
                Some(_) => (0, 1, 0),
            };
            sqlx::query(
                r#"
                INSERT INTO players (player_id, player_name, total_games, wins, losses, draws, total_turns, last_seen)
                VALUES (?, ?, 1, ?, ?, ?, ?, ?)
                ON CONFLICT(player_id) DO UPDATE SET
                    player_name = excluded.player_name,
                    total_games = total_games + 1,
                    wins = wins + excluded.wins,
                    losses = losses + excluded.losses,
                    draws = draws + excluded.draws,
                    total_turns = total_turns + excluded.total_turns,
                    last_seen = excluded.last_seen
                "#,
            )
            .bind(id.to_string())
            .bind(name)
            .bind(win)
            .bind(loss)
            .bind(draw)
            .bind(turn_count)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn stats(&self) -> anyhow::Result<Stats> {
        let row = sqlx::query(
            "SELECT COUNT(*) as n, AVG(end_time - start_time) as avg_dur FROM matches",
        )
        .fetch_one(&self.pool)
        .await?;
        let total_matches: i64 = row.try_get("n")?;
        let avg_match_duration: Option<f64> = row.try_get("avg_dur")?;

        let total_players: i64 = sqlx::query("SELECT COUNT(*) as n FROM players")
            .fetch_one(&self.pool)
            .await?
            .try_get("n")?;

        Ok(Stats {
            total_matches,
            total_players,
            avg_match_duration: avg_match_duration.unwrap_or(0.0),
        })
    }

    pub async fn leaderboard(&self) -> anyhow::Result<Vec<LeaderboardEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT player_id, player_name, wins, losses, draws, total_games,
                   CAST(wins AS REAL) / total_games AS win_rate
            FROM players
            WHERE total_games >= 3
            ORDER BY wins DESC, win_rate DESC
            LIMIT 10
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(LeaderboardEntry {
                    player_id: row.try_get("player_id")?,
                    player_name: row.try_get("player_name")?,
                    wins: row.try_get("wins")?,
                    losses: row.try_get("losses")?,
                    draws: row.try_get("draws")?,
                    total_games: row.try_get("total_games")?,
                    win_rate: row.try_get("win_rate")?,
                })
            })
            .collect()
    }

    pub async fn recent_matches(&self) -> anyhow::Result<Vec<RecentMatch>> {
        let rows = sqlx::query(
            r#"
            SELECT id, player1_id, player1_name, player2_id, player2_name, winner_id,
                   start_time, end_time, turn_count, deck1_id, deck2_id
            FROM matches
            ORDER BY end_time DESC
            LIMIT 20
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                Ok(RecentMatch {
                    id: row.try_get("id")?,
                    player1_id: row.try_get("player1_id")?,
                    player1_name: row.try_get("player1_name")?,
                    player2_id: row.try_get("player2_id")?,
                    player2_name: row.try_get("player2_name")?,
                    winner_id: row.try_get("winner_id")?,
                    start_time: row.try_get("start_time")?,
                    end_time: row.try_get("end_time")?,
                    turn_count: row.try_get("turn_count")?,
                    deck1_id: row.try_get("deck1_id")?,
                    deck2_id: row.try_get("deck2_id")?,
                })
            })
            .collect()
    }

    pub async fn player(&self, player_id: &str) -> anyhow::Result<Option<PlayerStats>> {
        let row = sqlx::query(
            r#"
            SELECT player_id, player_name, total_games, wins, losses, draws, total_turns,
                   CAST(wins AS REAL) / NULLIF(total_games, 0) AS win_rate
            FROM players
            WHERE player_id = ?
            "#,
        )
        .bind(player_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            Ok(PlayerStats {
                player_id: row.try_get("player_id")?,
                player_name: row.try_get("player_name")?,
                total_games: row.try_get("total_games")?,
                wins: row.try_get("wins")?,
                losses: row.try_get("losses")?,
                draws: row.try_get("draws")?,
                total_turns: row.try_get("total_turns")?,
                win_rate: row.try_get::<Option<f64>, _>("win_rate")?.unwrap_or(0.0),
            })
        })
        .transpose()
    }
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
