// /////////////////////////////////////////////////////////////////////////////
// Pipeline Runtime
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Binary entry point: parse and validate the CLI, compose the runtime, and
//! translate the result into a process exit code.

use pipeline_runtime_bootstrap::{bootstrap_cli, result_to_exit_code, runner};

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = match bootstrap_cli() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("argument error: {e}");
            return std::process::ExitCode::from(64); // EX_USAGE
        }
    };

    let result = runner::run(cli).await;
    result_to_exit_code(result)
}
