pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS runs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  timestamp TEXT NOT NULL,
  model_id TEXT NOT NULL,
  provider TEXT NOT NULL,
  region TEXT,
  temperature REAL NOT NULL,
  top_p REAL NOT NULL,
  max_tokens INTEGER NOT NULL,
  suite_version TEXT NOT NULL,
  correctness_score INTEGER NOT NULL,
  ttft_median REAL,
  ttft_p95 REAL,
  latency_median REAL,
  latency_p95 REAL,
  tokens_per_sec_median REAL,
  tokens_per_sec_p95 REAL,
  output_tokens_median REAL,
  error_rate REAL NOT NULL,
  refusal_rate REAL NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('GREEN', 'YELLOW', 'RED')),
  flags TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs(timestamp DESC);

CREATE TABLE IF NOT EXISTS test_cases (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id INTEGER NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  prompt_id TEXT NOT NULL,
  prompt_version TEXT NOT NULL,
  replicate_number INTEGER NOT NULL,
  request_id TEXT NOT NULL,
  success INTEGER NOT NULL,
  score INTEGER,
  ttft REAL,
  total_latency REAL NOT NULL,
  output_tokens INTEGER NOT NULL,
  tokens_per_sec REAL NOT NULL,
  finish_reason TEXT,
  output_hash TEXT NOT NULL,
  raw_output TEXT,
  error_message TEXT
);

CREATE INDEX IF NOT EXISTS idx_test_cases_run_id ON test_cases(run_id);

CREATE TABLE IF NOT EXISTS config (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS submissions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  created_at TEXT NOT NULL,
  anonymous_user_id TEXT NOT NULL,
  model TEXT NOT NULL,
  test_score INTEGER NOT NULL,
  continuous_score REAL,
  total_tests INTEGER NOT NULL,
  ttft_ms REAL,
  tokens_per_second REAL,
  avg_output_length REAL,
  error_rate REAL NOT NULL,
  region TEXT,
  test_details_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_submissions_created_at ON submissions(created_at);

CREATE TABLE IF NOT EXISTS run_lock (
  id INTEGER PRIMARY KEY CHECK (id = 1),
  holder TEXT NOT NULL,
  acquired_at TEXT NOT NULL
);
"#;

/// Same shape as `DDL`, in postgres dialect. Columns added by sqlite migrations
/// are part of the base table here.
pub const PG_DDL: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS runs (
  id BIGSERIAL PRIMARY KEY,
  timestamp TIMESTAMPTZ NOT NULL,
  model_id TEXT NOT NULL,
  provider TEXT NOT NULL,
  region TEXT,
  temperature DOUBLE PRECISION NOT NULL,
  top_p DOUBLE PRECISION NOT NULL,
  max_tokens INTEGER NOT NULL,
  suite_version TEXT NOT NULL,
  correctness_score INTEGER NOT NULL,
  correctness_total INTEGER NOT NULL DEFAULT 0,
  ttft_median DOUBLE PRECISION,
  ttft_p95 DOUBLE PRECISION,
  latency_median DOUBLE PRECISION,
  latency_p95 DOUBLE PRECISION,
  tokens_per_sec_median DOUBLE PRECISION,
  tokens_per_sec_p95 DOUBLE PRECISION,
  output_tokens_median DOUBLE PRECISION,
  error_rate DOUBLE PRECISION NOT NULL,
  refusal_rate DOUBLE PRECISION NOT NULL,
  status TEXT NOT NULL CHECK (status IN ('GREEN', 'YELLOW', 'RED')),
  flags TEXT NOT NULL DEFAULT '[]'
)"#,
    "CREATE INDEX IF NOT EXISTS idx_runs_timestamp ON runs(timestamp DESC)",
    r#"CREATE TABLE IF NOT EXISTS test_cases (
  id BIGSERIAL PRIMARY KEY,
  run_id BIGINT NOT NULL REFERENCES runs(id) ON DELETE CASCADE,
  prompt_id TEXT NOT NULL,
  prompt_version TEXT NOT NULL,
  replicate_number INTEGER NOT NULL,
  request_id TEXT NOT NULL,
  success BOOLEAN NOT NULL,
  score SMALLINT,
  ttft DOUBLE PRECISION,
  total_latency DOUBLE PRECISION NOT NULL,
  output_tokens INTEGER NOT NULL,
  tokens_per_sec DOUBLE PRECISION NOT NULL,
  finish_reason TEXT,
  output_hash TEXT NOT NULL,
  raw_output TEXT,
  error_message TEXT,
  refusal BOOLEAN NOT NULL DEFAULT FALSE
)"#,
    "CREATE INDEX IF NOT EXISTS idx_test_cases_run_id ON test_cases(run_id)",
    r#"CREATE TABLE IF NOT EXISTS config (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL,
  updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)"#,
    r#"CREATE TABLE IF NOT EXISTS submissions (
  id BIGSERIAL PRIMARY KEY,
  created_at TIMESTAMPTZ NOT NULL,
  anonymous_user_id TEXT NOT NULL,
  model TEXT NOT NULL,
  test_score INTEGER NOT NULL,
  continuous_score DOUBLE PRECISION,
  total_tests INTEGER NOT NULL,
  ttft_ms DOUBLE PRECISION,
  tokens_per_second DOUBLE PRECISION,
  avg_output_length DOUBLE PRECISION,
  error_rate DOUBLE PRECISION NOT NULL,
  region TEXT,
  test_details_json TEXT NOT NULL
)"#,
    "CREATE INDEX IF NOT EXISTS idx_submissions_created_at ON submissions(created_at)",
    r#"CREATE TABLE IF NOT EXISTS run_lock (
  id SMALLINT PRIMARY KEY CHECK (id = 1),
  holder TEXT NOT NULL,
  acquired_at TIMESTAMPTZ NOT NULL
)"#,
];
