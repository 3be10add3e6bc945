use crate::cli::ParamsArgs;
use crate::exit_codes;
use crate::output;
use crate::sort_params;
use serde::Serialize;
use spikesort_rs::ParamValue;

#[derive(Serialize)]
struct ParamInfo {
    name: &'static str,
    kind: String,
    default: ParamValue,
    documentation: &'static str,
}

pub fn execute(args: ParamsArgs) -> i32 {
    let adapter = match sort_params::resolve_backend(&args.backend) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            return exit_codes::INPUT_ERROR;
        }
    };
    let descriptor = adapter.descriptor();

    let params: Vec<ParamInfo> = descriptor
        .params
        .iter()
        .map(|p| ParamInfo {
            name: p.name,
            kind: sort_params::kind_label(&p.kind),
            default: p.default.to_value(),
            documentation: p.documentation,
        })
        .collect();

    if args.json {
        if let Err(code) = output::emit_json(&params, false, None) {
            return code;
        }
    } else {
        println!("{} ({})\n", descriptor.display_name, descriptor.name);
        println!("  {:<24} {:<28} {:<10}", "Name", "Type", "Default");
        println!("  {}", "-".repeat(64));
        for p in &params {
            let default = serde_json::to_string(&p.default).unwrap_or_default();
            println!("  {:<24} {:<28} {:<10}", p.name, p.kind, default);
        }
    }

    exit_codes::SUCCESS
}
