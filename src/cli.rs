use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser};

use crate::environment::{ConstructError, Environment, NativeEnvironment};
use crate::manifest::Manifest;
use crate::probe::{Requirement, ensure_capability};
use crate::search_path::{LOADER_PATH_VAR, LibrarySearchPath};

pub const EXIT_SUCCESS: i32 = 0;
/// Anything without a dedicated code, such as an unwritable file list.
pub const EXIT_GENERIC_FAILURE: i32 = 1;
/// Dependency or constructor failure.
pub const EXIT_LAUNCH_FAILURE: i32 = 2;

const DEFAULT_FHC_PATTERN: &str = "/pnfs/uboone/persistent/users/bnayak/flux_files/\
uboone_beamsim_g4.10.4/me000z200i/run*/files/g4numi_minervame_me000z200i_*.root";
const DEFAULT_RHC_PATTERN: &str = "/pnfs/uboone/persistent/users/bnayak/flux_files/\
uboone_beamsim_g4.10.4/me000z-200i/run*/files/g4numi_minervame_me000z-200i_*.root";
const DEFAULT_OUTPUT: &str = "dk2nu_g4104_fhc_rhc.root";
const DEFAULT_FILELIST: &str = "dk2nu_g4104_fhc_rhc.files";

/// Library names that may carry the dk2nu dictionary, preferred naming first.
pub const DK2NU_LIBRARIES: &[&str] = &[
    "libdk2nuTree",
    "libdk2nuTree_v2",
    "libdk2nuTree_cpp",
    "libdk2nu",
];

pub const DK2NU_FLUX: Requirement<'static> = Requirement {
    capability: "Dk2NuFlux",
    candidates: DK2NU_LIBRARIES,
    remediation: "Make sure the dk2nu UPS product is setup (e.g. `setup dk2nu`) or the dk2nu \
shared libraries are on the library search path (--library-path or the loader path variable).",
};

#[derive(Debug, Parser)]
#[command(
    name = "dk2nu-flux",
    version,
    about = "Instantiate Dk2NuFlux from horn-polarity file patterns"
)]
pub struct Cli {
    #[command(flatten)]
    pub launch: LaunchArgs,

    /// Enable debug logging on stderr
    #[arg(long)]
    pub debug: bool,
}

#[derive(Debug, Clone, Args)]
pub struct LaunchArgs {
    /// Glob that resolves to forward horn current files
    #[arg(long, default_value = DEFAULT_FHC_PATTERN)]
    pub fhc_pattern: String,

    /// Glob that resolves to reverse horn current files
    #[arg(long, default_value = DEFAULT_RHC_PATTERN)]
    pub rhc_pattern: String,

    /// Output ROOT filename
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// File that receives the horn-polarity patterns
    #[arg(long, default_value = DEFAULT_FILELIST)]
    pub filelist: PathBuf,

    /// Extra directory searched for the dk2nu libraries (repeatable)
    #[arg(short = 'L', long = "library-path", value_name = "DIR")]
    pub library_path: Vec<PathBuf>,
}

/// Run against the native loader, reporting on the process streams.
pub fn run(cli: &Cli) -> anyhow::Result<i32> {
    let search_path = LibrarySearchPath::from_env(&cli.launch.library_path);
    tracing::debug!(
        dirs = ?search_path.dirs(),
        loader_var = LOADER_PATH_VAR,
        "library search path"
    );
    let mut env = NativeEnvironment::new(search_path);

    let stdout = std::io::stdout();
    let stderr = std::io::stderr();
    launch(&cli.launch, &mut env, &mut stdout.lock(), &mut stderr.lock())
}

/// Writes the file list, ensures `Dk2NuFlux` is loadable and constructs it.
///
/// Returns the process exit code. Errors are reserved for failures with no
/// dedicated exit code, such as an unwritable file list.
pub fn launch<E: Environment>(
    args: &LaunchArgs,
    env: &mut E,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> anyhow::Result<i32> {
    Manifest::new(&args.fhc_pattern, &args.rhc_pattern).write(&args.filelist)?;
    writeln!(out, "Wrote horn-polarity patterns to {}", args.filelist.display())?;
    writeln!(out, "  FHC: {}", args.fhc_pattern)?;
    writeln!(out, "  RHC: {}", args.rhc_pattern)?;
    writeln!(out, "Output will be stored in {}", args.output.display())?;

    match ensure_capability(env, &DK2NU_FLUX) {
        Ok(Some(library)) => writeln!(out, "Loaded dk2nu dictionary from {library}")?,
        Ok(None) => {}
        Err(probe_err) => {
            writeln!(err, "{probe_err}").context("writing diagnostic")?;
            return Ok(EXIT_LAUNCH_FAILURE);
        }
    }

    let flux = match env.construct(DK2NU_FLUX.capability, true, &args.filelist, &args.output) {
        Ok(flux) => flux,
        Err(ConstructError::Unresolved { capability }) => {
            writeln!(
                err,
                "Runtime does not provide {capability} even after loading candidate libraries. \
Check your dk2nu installation."
            )
            .context("writing diagnostic")?;
            return Ok(EXIT_LAUNCH_FAILURE);
        }
        Err(other) => {
            writeln!(err, "{other}").context("writing diagnostic")?;
            return Ok(EXIT_LAUNCH_FAILURE);
        }
    };

    // Kept until the launcher returns; the native instance is never freed.
    let _flux = flux;
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::{
        Cli, DEFAULT_FHC_PATTERN, DEFAULT_FILELIST, DEFAULT_OUTPUT, DEFAULT_RHC_PATTERN,
        DK2NU_LIBRARIES, EXIT_LAUNCH_FAILURE, EXIT_SUCCESS, LaunchArgs, launch,
    };
    use crate::environment::fake::FakeEnvironment;

    fn args_in(dir: &tempfile::TempDir) -> LaunchArgs {
        let cli = Cli::try_parse_from([
            "dk2nu-flux",
            "--fhc-pattern",
            "/flux/fhc/*.root",
            "--rhc-pattern",
            "/flux/rhc/*.root",
            "-o",
            "out.root",
            "--filelist",
            dir.path().join("flux.files").to_str().unwrap(),
        ])
        .expect("arguments should parse");
        cli.launch
    }

    #[test]
    fn parses_defaults() {
        let cli = Cli::try_parse_from(["dk2nu-flux"]).expect("defaults should parse");

        assert!(cli.launch.fhc_pattern.contains("me000z200i"));
        assert!(cli.launch.rhc_pattern.contains("me000z-200i"));
        assert_eq!(cli.launch.output, PathBuf::from(DEFAULT_OUTPUT));
        assert_eq!(cli.launch.filelist, PathBuf::from(DEFAULT_FILELIST));
        assert!(cli.launch.library_path.is_empty());
        assert!(!cli.debug);
    }

    #[test]
    fn parses_repeated_library_paths() {
        let cli = Cli::try_parse_from(["dk2nu-flux", "-L", "/opt/a", "--library-path", "/opt/b"])
            .expect("arguments should parse");

        assert_eq!(
            cli.launch.library_path,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
    }

    #[test]
    fn preloaded_capability_succeeds_without_loading() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let args = args_in(&dir);
        let mut env = FakeEnvironment::preloaded();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = launch(&args, &mut env, &mut out, &mut err).expect("launch should run");

        assert_eq!(code, EXIT_SUCCESS);
        assert!(env.loads.is_empty());
        assert!(err.is_empty());
        assert_eq!(
            env.constructed,
            vec![(true, args.filelist.clone(), PathBuf::from("out.root"))]
        );

        let stdout = String::from_utf8(out).unwrap();
        assert!(stdout.contains("Wrote horn-polarity patterns to"));
        assert!(stdout.contains("  FHC: /flux/fhc/*.root"));
        assert!(stdout.contains("  RHC: /flux/rhc/*.root"));
        assert!(stdout.contains("Output will be stored in out.root"));
        assert!(!stdout.contains("Loaded dk2nu dictionary"));
    }

    #[test]
    fn default_patterns_are_written_to_filelist() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let filelist = dir.path().join("flux.files");
        let cli = Cli::try_parse_from(["dk2nu-flux", "--filelist", filelist.to_str().unwrap()])
            .expect("arguments should parse");
        let mut env = FakeEnvironment::preloaded();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = launch(&cli.launch, &mut env, &mut out, &mut err).expect("launch should run");

        assert_eq!(code, EXIT_SUCCESS);
        assert!(env.loads.is_empty());
        assert_eq!(
            std::fs::read_to_string(&filelist).unwrap(),
            format!("{DEFAULT_FHC_PATTERN}\n{DEFAULT_RHC_PATTERN}\n")
        );
        assert_eq!(
            env.constructed,
            vec![(true, filelist.clone(), PathBuf::from(DEFAULT_OUTPUT))]
        );
    }

    #[test]
    fn reports_library_that_activated_capability() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let args = args_in(&dir);
        let mut env = FakeEnvironment::exposed_after(2);
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = launch(&args, &mut env, &mut out, &mut err).expect("launch should run");

        assert_eq!(code, EXIT_SUCCESS);
        assert_eq!(env.loads, DK2NU_LIBRARIES[..2]);
        let stdout = String::from_utf8(out).unwrap();
        assert!(stdout.contains("Loaded dk2nu dictionary from libdk2nuTree_v2"));
    }

    #[test]
    fn unavailable_capability_exits_with_diagnostic_after_writing_manifest() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let args = args_in(&dir);
        let mut env = FakeEnvironment::never();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = launch(&args, &mut env, &mut out, &mut err).expect("launch should run");

        assert_eq!(code, EXIT_LAUNCH_FAILURE);
        assert_eq!(env.loads, DK2NU_LIBRARIES);
        assert!(env.constructed.is_empty());

        let stderr = String::from_utf8(err).unwrap();
        assert!(stderr.contains("libdk2nuTree (status=-1)"));
        assert!(stderr.contains("libdk2nu (status=-1)"));
        assert!(stderr.contains("setup dk2nu"));

        assert_eq!(
            std::fs::read_to_string(&args.filelist).unwrap(),
            "/flux/fhc/*.root\n/flux/rhc/*.root\n"
        );
    }

    #[test]
    fn unresolved_constructor_exits_with_fixed_diagnostic() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let args = args_in(&dir);
        let mut env = FakeEnvironment::preloaded().without_constructor();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let code = launch(&args, &mut env, &mut out, &mut err).expect("launch should run");

        assert_eq!(code, EXIT_LAUNCH_FAILURE);
        assert_eq!(
            String::from_utf8(err).unwrap(),
            "Runtime does not provide Dk2NuFlux even after loading candidate libraries. \
Check your dk2nu installation.\n"
        );
    }

    #[test]
    fn unwritable_filelist_is_a_generic_error() {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let mut args = args_in(&dir);
        args.filelist = dir.path().join("missing").join("flux.files");
        let mut env = FakeEnvironment::preloaded();
        let (mut out, mut err) = (Vec::new(), Vec::new());

        let result = launch(&args, &mut env, &mut out, &mut err);

        assert!(result.is_err());
        assert!(env.loads.is_empty());
        assert!(out.is_empty());
    }
}
