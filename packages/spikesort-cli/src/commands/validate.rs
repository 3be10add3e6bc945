use crate::cli::ValidateArgs;
use crate::exit_codes;
use crate::output;
use crate::sort_params;
use serde::Serialize;
use spikesort_rs::RunConfig;

#[derive(Serialize)]
struct ValidateOutput {
    backend: String,
    valid: bool,
    config: Option<RunConfig>,
    error: Option<String>,
}

pub fn execute(args: ValidateArgs) -> i32 {
    let adapter = match sort_params::resolve_backend(&args.backend) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let outcome = sort_params::load_overrides(&args.param_args).and_then(|overrides| {
        adapter
            .descriptor()
            .validate(&overrides)
            .map_err(|e| e.to_string())
    });

    let result = match outcome {
        Ok(config) => ValidateOutput {
            backend: args.backend.clone(),
            valid: true,
            config: Some(config),
            error: None,
        },
        Err(e) => ValidateOutput {
            backend: args.backend.clone(),
            valid: false,
            config: None,
            error: Some(e),
        },
    };

    if args.json {
        if let Err(code) = output::emit_json(&result, false, None) {
            return code;
        }
    } else if let Some(ref err) = result.error {
        eprintln!("Error: {}", err);
    } else {
        println!(
            "Parameters are valid for '{}' ({} resolved)",
            args.backend,
            result.config.as_ref().map(RunConfig::len).unwrap_or(0)
        );
    }

    if result.valid {
        exit_codes::SUCCESS
    } else {
        exit_codes::INPUT_ERROR
    }
}
