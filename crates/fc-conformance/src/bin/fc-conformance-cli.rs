#![forbid(unsafe_code)]

//! Runs the built-in oracle suite, writes the JSON report artifact, and
//! exits nonzero when any case fails.

use std::process::ExitCode;

use fc_conformance::{HarnessConfig, run_oracle_suite, write_suite_report};

fn main() -> ExitCode {
    let config = HarnessConfig::default_paths();
    let report = run_oracle_suite(&config);

    let report_path = config.suite_report_path();
    if let Err(err) = write_suite_report(&report, &report_path) {
        eprintln!("failed to write {}: {err}", report_path.display());
        return ExitCode::FAILURE;
    }

    match serde_json::to_string_pretty(&report) {
        Ok(payload) => println!("{payload}"),
        Err(err) => {
            eprintln!("failed to encode report: {err}");
            return ExitCode::FAILURE;
        }
    }

    eprintln!(
        "oracle suite: {} passed, {} failed (report: {})",
        report.passed,
        report.failed,
        report_path.display()
    );

    if report.is_green() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
