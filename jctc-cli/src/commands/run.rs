//! Run Command

use clap::Args;
use std::path::PathBuf;

/// Arguments for `jctc run`
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Evaluate only; change nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Restrict the pass to these policy ids (repeatable)
    #[arg(short, long = "policy", value_name = "ID")]
    pub policies: Vec<String>,

    /// JSON file with `entities`, `policies` and `holds`
    #[arg(long, value_name = "FILE")]
    pub fixture: PathBuf,
}

impl RunArgs {
    /// Policy selection, `None` for all active policies
    pub fn policy_selection(&self) -> Option<Vec<String>> {
        (!self.policies.is_empty()).then(|| self.policies.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        args: RunArgs,
    }

    #[test]
    fn test_run_args() {
        let cli = TestCli::try_parse_from([
            "test", "--dry-run", "--policy", "cases-7y", "--policy", "evidence-10y",
            "--fixture", "fixture.json",
        ])
        .unwrap();
        assert!(cli.args.dry_run);
        assert_eq!(
            cli.args.policy_selection(),
            Some(vec!["cases-7y".to_string(), "evidence-10y".to_string()])
        );
    }

    #[test]
    fn test_run_defaults_to_all_policies() {
        let cli = TestCli::try_parse_from(["test", "--fixture", "fixture.json"]).unwrap();
        assert!(!cli.args.dry_run);
        assert_eq!(cli.args.policy_selection(), None);
    }

    #[test]
    fn test_fixture_is_required() {
        assert!(TestCli::try_parse_from(["test", "--dry-run"]).is_err());
    }
}
