use crate::cli::BackendsArgs;
use crate::exit_codes;
use crate::output;
use serde::Serialize;
use spikesort_rs::BACKEND_REGISTRY;

#[derive(Serialize)]
struct BackendInfo {
    name: &'static str,
    display_name: &'static str,
    installed: bool,
    deterministic: bool,
    num_params: usize,
    documentation: &'static str,
}

pub fn execute(args: BackendsArgs) -> i32 {
    let backends: Vec<BackendInfo> = BACKEND_REGISTRY
        .iter()
        .map(|adapter| {
            let d = adapter.descriptor();
            BackendInfo {
                name: d.name,
                display_name: d.display_name,
                installed: adapter.is_installed(),
                deterministic: d.deterministic,
                num_params: d.params.len(),
                documentation: d.documentation,
            }
        })
        .filter(|b| !args.installed || b.installed)
        .collect();

    if args.json {
        if let Err(code) = output::emit_json(&backends, false, None) {
            return code;
        }
    } else {
        println!("Sorting Backends:\n");
        println!(
            "  {:<16} {:<24} {:<10} {:<8}",
            "Name", "Display name", "Installed", "Params"
        );
        println!("  {}", "-".repeat(60));
        for b in &backends {
            println!(
                "  {:<16} {:<24} {:<10} {:<8}",
                b.name,
                b.display_name,
                if b.installed { "yes" } else { "no" },
                b.num_params
            );
        }
        println!();
        println!("Use `spikesort params <name>` to list a backend's parameters.");
    }

    exit_codes::SUCCESS
}
