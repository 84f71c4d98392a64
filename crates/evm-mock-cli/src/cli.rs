use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "evm-mock",
    version,
    about = "Storage slot and interface inspection for EVM fakes and mocks"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Print results as JSON
    #[arg(long, global = true, env = "EVM_MOCK_JSON")]
    pub json: bool,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    #[command(about = "Compute the storage slot and offset of a variable")]
    Slot(SlotArgs),
    #[command(about = "List the function signatures and selectors of an interface")]
    Selectors(SelectorsArgs),
}

#[derive(clap::Args, Debug)]
pub struct SlotArgs {
    /// Storage layout JSON emitted by the compiler
    #[arg(long, env = "EVM_MOCK_LAYOUT")]
    pub layout: PathBuf,
    /// Label of the variable
    #[arg(long)]
    pub variable: String,
    /// Mapping keys, array indices or struct member names, outermost first
    #[arg(long = "path", value_name = "KEY")]
    pub path: Vec<String>,
}

#[derive(clap::Args, Debug)]
pub struct SelectorsArgs {
    /// ABI file, artifact file, or inline ABI JSON / signatures
    #[arg(long)]
    pub abi: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slot_command_with_path() {
        let cli = Cli::try_parse_from([
            "evm-mock",
            "slot",
            "--layout",
            "layout.json",
            "--variable",
            "balances",
            "--path",
            "0x00000000000000000000000000000000000000a1",
            "--path",
            "3",
        ])
        .unwrap();
        assert!(!cli.json);
        match cli.command {
            Commands::Slot(args) => {
                assert_eq!(args.layout, PathBuf::from("layout.json"));
                assert_eq!(args.variable, "balances");
                assert_eq!(args.path.len(), 2);
                assert_eq!(args.path[1], "3");
            }
            _ => panic!("expected slot command"),
        }
    }

    #[test]
    fn parses_global_json_flag_after_subcommand() {
        let cli = Cli::try_parse_from(["evm-mock", "selectors", "--abi", "abi.json", "--json"])
            .unwrap();
        assert!(cli.json);
        assert!(matches!(cli.command, Commands::Selectors(_)));
    }

    #[test]
    fn slot_requires_variable() {
        assert!(Cli::try_parse_from(["evm-mock", "slot", "--layout", "layout.json"]).is_err());
    }
}
