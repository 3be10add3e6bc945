use crate::cli::InfoArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use spikesort_rs::backends::{installed_backends, DEFAULT_PYTHON_DIRS, PYTHON_ENV_VAR};
use spikesort_rs::find_python;

#[derive(Serialize)]
struct InfoOutput {
    cli_version: String,
    python_path: Option<String>,
    python_found: bool,
    installed_backends: Vec<&'static str>,
    platform: String,
    arch: String,
    search_paths: Vec<&'static str>,
}

pub fn execute(args: InfoArgs) -> i32 {
    let python_path = find_python(args.python.as_deref());

    let info = InfoOutput {
        cli_version: env!("CARGO_PKG_VERSION").to_string(),
        python_path: python_path.as_ref().map(|p| p.display().to_string()),
        python_found: python_path.is_some(),
        installed_backends: installed_backends(),
        platform: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        search_paths: DEFAULT_PYTHON_DIRS.to_vec(),
    };

    if args.json {
        if let Err(code) = output::emit_json(&info, false, None) {
            return code;
        }
    } else {
        println!("spikesort CLI v{}", info.cli_version);
        println!("Platform: {} ({})", info.platform, info.arch);
        println!();
        match info.python_path {
            Some(ref path) => println!("Python: {}", path),
            None => println!("Python: not found"),
        }
        println!(
            "Search paths: ${}, {}, $PATH",
            PYTHON_ENV_VAR,
            info.search_paths.join(", ")
        );
        println!("Installed backends: {}", info.installed_backends.join(", "));
    }

    exit_codes::SUCCESS
}
