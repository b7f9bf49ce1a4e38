//! Command line: `umbra [WIDTH HEIGHT] [--no-validation] [--no-vsync] [--effects a,b,c]`.

use umbra_renderer::RendererConfig;

pub const DEFAULT_WIDTH: u32 = 1280;
pub const DEFAULT_HEIGHT: u32 = 720;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CliError {
    BadSize(String),
    MissingValue(&'static str),
    UnknownFlag(String),
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::BadSize(arg) => write!(f, "window size must be two positive integers, got {arg:?}"),
            CliError::MissingValue(flag) => write!(f, "{flag} expects a value"),
            CliError::UnknownFlag(flag) => write!(f, "unknown option {flag:?}"),
        }
    }
}

impl std::error::Error for CliError {}

#[derive(Debug)]
pub struct Options {
    pub width: u32,
    pub height: u32,
    pub config: RendererConfig,
}

/// Parse everything after the program name.
pub fn parse<I, S>(args: I) -> Result<Options, CliError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut config = RendererConfig::default();
    let mut sizes = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_ref() {
            "--no-validation" => config.validation = false,
            "--validation" => config.validation = true,
            "--no-vsync" => config.vsync = false,
            "--effects" => {
                let list = args.next().ok_or(CliError::MissingValue("--effects"))?;
                config.effects = list
                    .as_ref()
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect();
            }
            flag if flag.starts_with("--") => return Err(CliError::UnknownFlag(flag.to_string())),
            size => {
                let value = size
                    .parse::<u32>()
                    .ok()
                    .filter(|&v| v > 0)
                    .ok_or_else(|| CliError::BadSize(size.to_string()))?;
                sizes.push(value);
            }
        }
    }

    let (width, height) = match sizes.as_slice() {
        [] => (DEFAULT_WIDTH, DEFAULT_HEIGHT),
        [w, h] => (*w, *h),
        _ => return Err(CliError::BadSize(format!("{sizes:?}"))),
    };

    Ok(Options { width, height, config })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = parse(Vec::<String>::new()).unwrap();
        assert_eq!((options.width, options.height), (DEFAULT_WIDTH, DEFAULT_HEIGHT));
        assert_eq!(options.config.effects, RendererConfig::default().effects);
    }

    #[test]
    fn test_size_and_flags() {
        let options = parse(["1920", "1080", "--no-vsync", "--no-validation", "--effects", "tonemap, vignette"]).unwrap();
        assert_eq!((options.width, options.height), (1920, 1080));
        assert!(!options.config.vsync);
        assert!(!options.config.validation);
        assert_eq!(options.config.effects, vec!["tonemap", "vignette"]);
    }

    #[test]
    fn test_empty_effect_list_disables_chain() {
        let options = parse(["--effects", ""]).unwrap();
        assert!(options.config.effects.is_empty());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(parse(["800"]).unwrap_err(), CliError::BadSize("[800]".to_string()));
        assert_eq!(parse(["0", "600"]).unwrap_err(), CliError::BadSize("0".to_string()));
        assert_eq!(parse(["--effects"]).unwrap_err(), CliError::MissingValue("--effects"));
        assert_eq!(parse(["--fullscreen"]).unwrap_err(), CliError::UnknownFlag("--fullscreen".to_string()));
    }
}
