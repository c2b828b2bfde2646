//! Plugin side of the exec protocol, for module authors.

use std::io::{Read, Write};
use std::process::ExitCode;

use crate::{GeneratorRequest, GeneratorResponse};

/// Read one request from stdin, run `generate`, write the response to stdout.
/// Failures are reported in the response `error` field and with a failing exit code.
pub fn serve<F>(generate: F) -> ExitCode
where
    F: FnOnce(GeneratorRequest) -> Result<GeneratorResponse, String>,
{
    let mut input = String::new();
    let response = match std::io::stdin().read_to_string(&mut input) {
        Err(e) => GeneratorResponse::failed(format!("reading request: {}", e)),
        Ok(_) => match serde_json::from_str::<GeneratorRequest>(&input) {
            Err(e) => GeneratorResponse::failed(format!("decoding request: {}", e)),
            Ok(req) => generate(req).unwrap_or_else(|e| GeneratorResponse::failed(e)),
        },
    };
    let failed = response.error.is_some();
    let written = serde_json::to_vec(&response)
        .map_err(|e| e.to_string())
        .and_then(|body| {
            let mut out = std::io::stdout().lock();
            out.write_all(&body).and_then(|_| out.flush()).map_err(|e| e.to_string())
        });
    if let Err(e) = written {
        eprintln!("writing response: {}", e);
        return ExitCode::FAILURE;
    }
    if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS }
}
