use crate::cli::RunArgs;
use crate::exit_codes;
use crate::output;
use crate::sort_params;
use spikesort_rs::{ExecutionMode, Recording, SpikeSorter};

pub fn execute(args: RunArgs) -> i32 {
    if let Err(msg) = sort_params::validate_file(&args.recording) {
        eprintln!("Error: {}", msg);
        return exit_codes::INPUT_ERROR;
    }

    let adapter = match sort_params::resolve_backend(&args.backend) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let overrides = match sort_params::load_overrides(&args.param_args) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };

    let recording =
        match sort_params::load_recording(&args.recording, args.sr, args.groups.as_deref()) {
            Ok(r) => r,
            Err(msg) => {
                eprintln!("Error: {}", msg);
                return exit_codes::INPUT_ERROR;
            }
        };

    let options = sort_params::build_options(&args);
    if !args.quiet {
        eprintln!("Sorting {} with '{}'...", args.recording, args.backend);
        eprintln!(
            "  Channels: {}, samples: {}, groups: {}",
            recording.channel_ids().len(),
            recording.num_samples(),
            recording.channel_groups().len()
        );
        if options.mode == ExecutionMode::Parallel {
            eprintln!("  Groups run in parallel");
        }
    }

    let sorter = SpikeSorter::new(adapter).with_options(options);
    match sorter.sort(&recording, &overrides) {
        Ok(result) => {
            if let Err(code) = output::emit_json(&result, args.compact, args.output.as_deref()) {
                return code;
            }
            if !args.quiet {
                eprintln!(
                    "Found {} units in {} groups",
                    result.num_units(),
                    result.groups().len()
                );
                if let Some(ref path) = args.output {
                    eprintln!("Results written to {}", path);
                }
            }
            exit_codes::SUCCESS
        }
        Err(e) => {
            eprintln!("Sorting failed: {}", e);
            sort_params::exit_code_for(&e)
        }
    }
}
