use crate::model::{RunStatus, SuiteRun, TestCase};
use std::fmt::Write;

fn status_icon(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Green => "✅",
        RunStatus::Yellow => "⚠️",
        RunStatus::Red => "❌",
    }
}

fn secs(v: Option<f64>) -> String {
    v.map(|s| format!("{:.2}s", s)).unwrap_or_else(|| "-".into())
}

fn num(v: Option<f64>) -> String {
    v.map(|x| format!("{:.1}", x)).unwrap_or_else(|| "-".into())
}

pub fn render_run_summary(run: &SuiteRun, cases: &[TestCase]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} Run #{} {} ({} / {}, suite {})",
        status_icon(run.status),
        run.id,
        run.status,
        run.provider,
        run.model_id,
        run.suite_version
    );

    for c in cases {
        let outcome = if c.error_message.is_some() {
            "ERROR"
        } else if c.success {
            "PASS"
        } else if c.refusal {
            "REFUSED"
        } else {
            "FAIL"
        };
        let _ = write!(
            out,
            "  {:<6} #{:<2} {:<8} {:>7.2}s {:>5} tok",
            c.prompt_id, c.replicate_number, outcome, c.total_latency, c.output_tokens
        );
        if let Some(e) = &c.error_message {
            let _ = write!(out, "  {}", e);
        }
        out.push('\n');
    }

    let _ = writeln!(
        out,
        "\nCorrectness: {}/{}   errors: {:.0}%   refusals: {:.0}%",
        run.correctness_score,
        run.correctness_total,
        run.error_rate * 100.0,
        run.refusal_rate * 100.0
    );
    let _ = writeln!(
        out,
        "TTFT p50/p95: {} / {}   latency p50/p95: {} / {}   tok/s p50: {}   output tok p50: {}",
        secs(run.ttft_median),
        secs(run.ttft_p95),
        secs(run.latency_median),
        secs(run.latency_p95),
        num(run.tokens_per_sec_median),
        num(run.output_tokens_median)
    );
    if run.flags.is_empty() {
        let _ = writeln!(out, "Flags: none");
    } else {
        let flags: Vec<&str> = run.flags.iter().map(|f| f.as_str()).collect();
        let _ = writeln!(out, "Flags: {}", flags.join(", "));
    }
    out
}

pub fn print_run_summary(run: &SuiteRun, cases: &[TestCase]) {
    eprint!("{}", render_run_summary(run, cases));
}

pub fn print_history(runs: &[SuiteRun]) {
    if runs.is_empty() {
        eprintln!("No runs recorded yet.");
        return;
    }
    eprintln!(
        "{:>5}  {:<20}  {:<6}  {:>7}  {:>8}  {:>8}  flags",
        "id", "timestamp", "status", "score", "tok/s", "p95 lat"
    );
    for r in runs {
        let flags: Vec<&str> = r.flags.iter().map(|f| f.as_str()).collect();
        eprintln!(
            "{:>5}  {:<20}  {:<6}  {:>7}  {:>8}  {:>8}  {}",
            r.id,
            r.timestamp.format("%Y-%m-%d %H:%M:%S"),
            r.status.as_str(),
            format!("{}/{}", r.correctness_score, r.correctness_total),
            num(r.tokens_per_sec_median),
            secs(r.latency_p95),
            flags.join(",")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlagSet, RegressionFlag};

    #[test]
    fn summary_lists_flags_and_missing_perf() {
        let mut flags = FlagSet::new();
        flags.insert(RegressionFlag::OutputCapDetected);
        let run = SuiteRun {
            id: 4,
            timestamp: chrono::Utc::now(),
            model_id: "m".into(),
            provider: "anthropic".into(),
            region: None,
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 1024,
            suite_version: "2025.1".into(),
            correctness_score: 3,
            correctness_total: 4,
            ttft_median: None,
            ttft_p95: None,
            latency_median: None,
            latency_p95: None,
            tokens_per_sec_median: None,
            tokens_per_sec_p95: None,
            output_tokens_median: None,
            error_rate: 0.25,
            refusal_rate: 0.0,
            status: RunStatus::Yellow,
            flags,
        };
        let text = render_run_summary(&run, &[]);
        assert!(text.contains("Run #4 YELLOW"));
        assert!(text.contains("Correctness: 3/4"));
        assert!(text.contains("errors: 25%"));
        assert!(text.contains("TTFT p50/p95: - / -"));
        assert!(text.contains("Flags: output_cap_detected"));
    }
}
