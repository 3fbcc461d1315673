//! Database schema definitions

/// SQL to create all tables
/// NOTE: Prices and PnL stored as TEXT to preserve rust_decimal::Decimal
/// precision; statistical ratios (win rates, ROI averages) stored as REAL.
pub const CREATE_TABLES: &str = r#"
-- Chaos trial log (append-only)
CREATE TABLE IF NOT EXISTS trials (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cycle INTEGER NOT NULL,
    entry_time INTEGER NOT NULL,
    exit_time INTEGER NOT NULL,
    entry_price TEXT NOT NULL,
    exit_price TEXT NOT NULL,
    pnl TEXT NOT NULL,
    is_win INTEGER NOT NULL,
    justification TEXT NOT NULL,
    snap_price TEXT NOT NULL,
    snap_momentum TEXT NOT NULL,
    snap_moving_avg TEXT NOT NULL,
    snap_volume TEXT NOT NULL,
    snap_volatility TEXT NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Discovered pattern registry
CREATE TABLE IF NOT EXISTS patterns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    signature TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    condition_json TEXT NOT NULL,
    win_rate REAL NOT NULL DEFAULT 0,
    sample_size INTEGER NOT NULL DEFAULT 0,
    confidence REAL NOT NULL DEFAULT 0,
    rationale TEXT NOT NULL DEFAULT '',
    upvotes INTEGER NOT NULL DEFAULT 0,
    downvotes INTEGER NOT NULL DEFAULT 0,
    origin TEXT NOT NULL,
    runs INTEGER NOT NULL DEFAULT 0,
    last_tested INTEGER,
    h2h_wins INTEGER NOT NULL DEFAULT 0,
    h2h_losses INTEGER NOT NULL DEFAULT 0,
    timeframes TEXT NOT NULL DEFAULT '[]',
    mined_passes INTEGER NOT NULL DEFAULT 1,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Head-to-head matchup log (append-only)
CREATE TABLE IF NOT EXISTS matchups (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    pattern_a INTEGER NOT NULL,
    pattern_b INTEGER NOT NULL,
    timeframe TEXT NOT NULL,
    roi_a TEXT NOT NULL,
    roi_b TEXT NOT NULL,
    bonus REAL NOT NULL,
    winner INTEGER NOT NULL,
    slice_start INTEGER NOT NULL,
    slice_end INTEGER NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Versioned orchestrator state (single row, compare-and-swap updates)
CREATE TABLE IF NOT EXISTS cycle_state (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    version INTEGER NOT NULL DEFAULT 0,
    cycle INTEGER NOT NULL DEFAULT 0,
    last_mined_cycle INTEGER NOT NULL DEFAULT 0,
    last_tournament_cycle INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- Discovery-source registry
CREATE TABLE IF NOT EXISTS pattern_origins (
    tag TEXT PRIMARY KEY,
    description TEXT NOT NULL
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_trials_cycle ON trials(cycle);
CREATE INDEX IF NOT EXISTS idx_patterns_signature ON patterns(signature);
CREATE INDEX IF NOT EXISTS idx_patterns_last_tested ON patterns(last_tested);
CREATE INDEX IF NOT EXISTS idx_matchups_winner ON matchups(winner);
CREATE INDEX IF NOT EXISTS idx_matchups_created ON matchups(created_at DESC)
"#;

/// ALTER TABLE migrations, run after table creation.
/// "duplicate column name" errors are tolerated on re-runs.
pub const MIGRATIONS: &[&str] = &[
    // Per-timeframe performance map added after the first tournament rollout
    "ALTER TABLE patterns ADD COLUMN timeframe_perf TEXT NOT NULL DEFAULT '{}'",
];

/// Idempotent seed rows: the singleton cycle-state row and the origin registry
pub const SEED_ROWS: &[&str] = &[
    "INSERT OR IGNORE INTO cycle_state (id) VALUES (1)",
    "INSERT OR IGNORE INTO pattern_origins (tag, description) VALUES \
     ('chaos_miner', 'Promoted from randomized trial buckets by the pattern miner')",
    "INSERT OR IGNORE INTO pattern_origins (tag, description) VALUES \
     ('seeded', 'Installed from a predefined pattern library')",
    "INSERT OR IGNORE INTO pattern_origins (tag, description) VALUES \
     ('manual', 'Entered by an operator')",
];
