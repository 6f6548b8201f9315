use clap::ValueEnum;
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, ValueEnum)]
#[strum(serialize_all = "lowercase")]
pub enum OptLevel {
    /// Emit the function as lowered
    #[default]
    None,
    /// Run the standard pass pipeline over every function
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompilerOptions {
    pub opt_level: OptLevel,
    /// Re-run the verifier once the optimizer is done with a function
    pub verify_after_optimization: bool,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            opt_level: OptLevel::None,
            verify_after_optimization: true,
        }
    }
}

impl CompilerOptions {
    pub fn optimized() -> Self {
        Self {
            opt_level: OptLevel::Default,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opt_levels_print_like_their_flag_values() {
        assert_eq!(OptLevel::None.to_string(), "none");
        assert_eq!(OptLevel::Default.to_string(), "default");
        assert_eq!(
            OptLevel::from_str("default", true),
            Ok(OptLevel::Default)
        );
    }
}
