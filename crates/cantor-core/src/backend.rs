//! Backend profiles.
//!
//! A [`BackendProfile`] is everything the session layer needs to know about
//! one interpreter: how to start it, how its output is split into frames, and
//! which command texts get special treatment. The built-in Octave and Scilab
//! profiles are plain values; additional ones come from the configuration
//! file.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::extension::{
    Extension, ExtensionSet, HistoryExtension, ScriptExtension, VariableManagementExtension,
};
use crate::{Error, Result};

/// How the interpreter process is attached.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Separate stdin/stdout/stderr pipes
    #[default]
    Pipe,
    /// Pseudo-terminal, stdout and stderr merged
    Pty,
}

/// Feature flags a backend advertises.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub enum Capability {
    /// Results can be rendered as LaTeX
    LatexOutput,
    /// Commands may ask for user input
    InteractiveMode,
    /// A syntax highlighter exists
    SyntaxHighlighting,
    /// Tab completion
    Completion,
    /// Help on function signatures
    SyntaxHelp,
    /// Variables can be listed and edited
    VariableManagement,
    /// Plots are delivered as image results
    IntegratedPlots,
}

/// How command boundaries are recognised in the interpreter's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FramingConfig {
    /// The interpreter prints a custom prompt carrying a sequence number.
    NumberedPrompt {
        /// Prompt regex, first capture group is the sequence number
        prompt: String,
        /// Continuation prompt regex, first capture group is the number
        #[serde(default)]
        subprompt: Option<String>,
        /// Input written to escape a continuation prompt
        #[serde(default = "default_force_close")]
        force_close: String,
        /// Input written after an interrupt to obtain a fresh prompt
        #[serde(default = "default_interrupt_sync")]
        interrupt_sync: String,
        /// Statement printing `{marker}`; when set it replaces `interrupt_sync`
        /// and the fresh prompt is the one following the marker line
        #[serde(default)]
        sync_statement: Option<String>,
        /// Command substrings for which a skipped prompt number is not an error
        #[serde(default)]
        skip_check_exempt: Vec<String>,
    },
    /// The session brackets each command with marker-printing statements.
    Sentinel {
        /// Marker printed before the command
        begin: String,
        /// Marker printed after the command
        end: String,
        /// Marker printed to resynchronise after login or interrupt
        sync: String,
        /// Statement printing a marker, `{marker}` is replaced by the marker
        print_template: String,
    },
}

fn default_force_close() -> String {
    ")]'\"\n".to_string()
}

fn default_interrupt_sync() -> String {
    "\n".to_string()
}

impl FramingConfig {
    /// Numbered prompt framing with default escape sequences.
    pub fn numbered_prompt(prompt: impl Into<String>, subprompt: Option<&str>) -> Self {
        FramingConfig::NumberedPrompt {
            prompt: prompt.into(),
            subprompt: subprompt.map(str::to_string),
            force_close: default_force_close(),
            interrupt_sync: default_interrupt_sync(),
            sync_statement: None,
            skip_check_exempt: Vec::new(),
        }
    }

    /// Sentinel framing.
    pub fn sentinel(
        begin: impl Into<String>,
        end: impl Into<String>,
        sync: impl Into<String>,
        print_template: impl Into<String>,
    ) -> Self {
        FramingConfig::Sentinel {
            begin: begin.into(),
            end: end.into(),
            sync: sync.into(),
            print_template: print_template.into(),
        }
    }

    /// Check that patterns compile and markers are usable.
    pub fn validate(&self) -> Result<()> {
        match self {
            FramingConfig::NumberedPrompt {
                prompt,
                subprompt,
                sync_statement,
                ..
            } => {
                let re = compile(prompt)?;
                if re.captures_len() < 2 {
                    return Err(Error::InvalidPattern {
                        pattern: prompt.clone(),
                        reason: "prompt needs a capture group for the sequence number"
                            .to_string(),
                    });
                }
                if let Some(subprompt) = subprompt {
                    compile(subprompt)?;
                }
                if sync_statement
                    .as_ref()
                    .is_some_and(|statement| !statement.contains("{marker}"))
                {
                    return Err(Error::Config(
                        "numbered_prompt sync_statement must contain {marker}".to_string(),
                    ));
                }
                Ok(())
            }
            FramingConfig::Sentinel {
                begin,
                end,
                sync,
                print_template,
            } => {
                if begin.is_empty() || end.is_empty() || sync.is_empty() {
                    return Err(Error::Config("sentinel markers cannot be empty".to_string()));
                }
                if begin == end || begin == sync || end == sync {
                    return Err(Error::Config("sentinel markers must be distinct".to_string()));
                }
                if !print_template.contains("{marker}") {
                    return Err(Error::Config(
                        "sentinel print_template must contain {marker}".to_string(),
                    ));
                }
                Ok(())
            }
        }
    }
}

/// Identifier-like words of a command.
fn words(command: &str) -> impl Iterator<Item = &str> {
    command
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
}

/// Compile a pattern, mapping failures to [`Error::InvalidPattern`].
pub fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| Error::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Description of one interpreter backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BackendProfile {
    /// Profile name, used for lookup
    pub name: String,
    /// Executable to start
    pub program: String,
    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory of the interpreter
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Process attachment
    #[serde(default)]
    pub transport: TransportKind,
    /// Boundary recognition
    pub framing: FramingConfig,
    /// Input asking the interpreter to quit
    #[serde(default = "default_exit_command")]
    pub exit_command: String,
    /// Commands resolved without touching the interpreter (anchored match)
    #[serde(default)]
    pub noop_pattern: Option<String>,
    /// Command words whose output is a help text
    #[serde(default)]
    pub help_commands: Vec<String>,
    /// Output line prefix naming an image file written by the interpreter
    #[serde(default)]
    pub image_marker: Option<String>,
    /// Command words that draw a plot
    #[serde(default)]
    pub plot_commands: Vec<String>,
    /// Statement appended to plot commands; it saves the figure and prints
    /// `image_marker` followed by the file path
    #[serde(default)]
    pub plot_print_command: Option<String>,
    /// Statements evaluated right after login
    #[serde(default)]
    pub autorun_scripts: Vec<String>,
    /// Advertised capabilities
    #[serde(default)]
    pub capabilities: BTreeSet<Capability>,
    /// Provided extensions
    #[serde(default)]
    pub extensions: ExtensionSet,
}

fn default_exit_command() -> String {
    "exit\n".to_string()
}

impl BackendProfile {
    /// Minimal profile; every optional field left empty.
    pub fn new(name: impl Into<String>, program: impl Into<String>, framing: FramingConfig) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
            transport: TransportKind::Pipe,
            framing,
            exit_command: default_exit_command(),
            noop_pattern: None,
            help_commands: Vec::new(),
            image_marker: None,
            plot_commands: Vec::new(),
            plot_print_command: None,
            autorun_scripts: Vec::new(),
            capabilities: BTreeSet::new(),
            extensions: ExtensionSet::new(),
        }
    }

    /// GNU Octave driven through a numbered custom prompt.
    pub fn octave() -> Self {
        let framing = FramingConfig::NumberedPrompt {
            prompt: "CANTOR_OCTAVE_BACKEND_PROMPT:([0-9]+)> ".to_string(),
            subprompt: Some("CANTOR_OCTAVE_BACKEND_SUBPROMPT:([0-9]+)> ".to_string()),
            force_close: default_force_close(),
            interrupt_sync: default_interrupt_sync(),
            sync_statement: Some("printf(\"{marker}\\n\");".to_string()),
            skip_check_exempt: vec!["completion_matches".to_string()],
        };

        let mut profile = Self::new("octave", "octave-cli", framing);
        profile.args = [
            "--silent",
            "--interactive",
            "--persist",
            "--eval",
            "PS1('CANTOR_OCTAVE_BACKEND_PROMPT:\\#> ');",
            "--eval",
            "PS2('CANTOR_OCTAVE_BACKEND_SUBPROMPT:\\#> ');",
            "--eval",
            "suppress_verbose_help_message(1);",
            "--eval",
            "set(0, 'defaultfigurevisible', 'off');",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        profile.noop_pattern = Some("(,|;)+".to_string());
        profile.help_commands = vec!["help".to_string()];
        profile.image_marker = Some("CANTOR_OCTAVE_PLOT_FILE:".to_string());
        profile.plot_commands = [
            "plot", "semilogx", "semilogy", "loglog", "polar", "mesh", "contour", "bar",
            "stairs", "errorbar", "surf", "sombrero",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        profile.plot_print_command = Some(
            "__cantor_plot__ = [tempname(tempdir(), 'c-ob-') '.png']; \
             print('-dpng', __cantor_plot__); \
             printf('CANTOR_OCTAVE_PLOT_FILE:%s\\n', __cantor_plot__); \
             clear __cantor_plot__;"
                .to_string(),
        );
        profile.capabilities = [
            Capability::SyntaxHighlighting,
            Capability::Completion,
            Capability::SyntaxHelp,
            Capability::VariableManagement,
            Capability::IntegratedPlots,
        ]
        .into_iter()
        .collect();
        profile.extensions = ExtensionSet::new()
            .with(Extension::History(HistoryExtension {
                last_result: "ans".to_string(),
            }))
            .with(Extension::Script(ScriptExtension {
                run_script: "source \"{path}\"".to_string(),
                command_separator: ";".to_string(),
            }))
            .with(Extension::VariableManagement(VariableManagementExtension {
                set_value: "{name} = {value}".to_string(),
                remove_variable: "clear {name};".to_string(),
                clear_variables: "clear;".to_string(),
                save_variables: "save {file};".to_string(),
                load_variables: "load {file};".to_string(),
            }));
        profile
    }

    /// Scilab driven through printed begin/end markers.
    pub fn scilab() -> Self {
        let framing = FramingConfig::sentinel(
            "begin-cantor-scilab-command-processing",
            "terminated-cantor-scilab-command-processing",
            "sync-cantor-scilab-command-processing",
            "printf('{marker}\\n')",
        );

        let mut profile = Self::new("scilab", "scilab-cli", framing);
        profile.args = vec!["-nb".to_string()];
        profile.help_commands = vec!["help".to_string()];
        profile.capabilities = [
            Capability::SyntaxHighlighting,
            Capability::Completion,
            Capability::VariableManagement,
        ]
        .into_iter()
        .collect();
        profile.extensions = ExtensionSet::new()
            .with(Extension::Script(ScriptExtension {
                run_script: "exec(\"{path}\", -1)".to_string(),
                command_separator: ";".to_string(),
            }))
            .with(Extension::VariableManagement(VariableManagementExtension {
                set_value: "{name} = {value}".to_string(),
                remove_variable: "clear {name};".to_string(),
                clear_variables: "clear;".to_string(),
                save_variables: "save('{file}');".to_string(),
                load_variables: "load('{file}');".to_string(),
            }));
        profile
    }

    /// Profiles shipped with the crate.
    pub fn builtin() -> Vec<BackendProfile> {
        vec![Self::octave(), Self::scilab()]
    }

    /// Whether the backend advertises `capability`.
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Anchored no-op regex, if the profile defines one.
    pub fn noop_regex(&self) -> Result<Option<Regex>> {
        self.noop_pattern
            .as_deref()
            .map(|p| compile(&format!("^(?:{p})$")))
            .transpose()
    }

    /// Whether `command` is a help request.
    pub fn is_help_command(&self, command: &str) -> bool {
        words(command).any(|word| self.help_commands.iter().any(|h| h == word))
    }

    /// Text actually written for `command`.
    ///
    /// Plot commands get the profile's print statement appended on the same
    /// line, so the figure ends up as an image result. Help requests are left
    /// alone.
    pub fn prepare_command<'a>(&self, command: &'a str) -> Cow<'a, str> {
        let Some(print) = self.plot_print_command.as_deref() else {
            return Cow::Borrowed(command);
        };
        if !self.has_capability(Capability::IntegratedPlots)
            || self.is_help_command(command)
            || !words(command).any(|word| self.plot_commands.iter().any(|p| p == word))
        {
            return Cow::Borrowed(command);
        }

        let trimmed = command.trim_end();
        let separator = if trimmed.ends_with(';') || trimmed.ends_with(',') {
            " "
        } else {
            ", "
        };
        Cow::Owned(format!("{trimmed}{separator}{print}"))
    }

    /// Autorun statements as one command, `None` when there are none.
    pub fn autorun_command(&self) -> Option<String> {
        if self.autorun_scripts.is_empty() {
            None
        } else {
            Some(self.autorun_scripts.join("\n"))
        }
    }

    /// Validate the profile.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("backend name cannot be empty".to_string()));
        }
        if self.program.trim().is_empty() {
            return Err(Error::Config(format!(
                "backend '{}' program cannot be empty",
                self.name
            )));
        }
        self.framing.validate()?;
        self.noop_regex()?;
        if let Some(marker) = &self.image_marker {
            if marker.is_empty() {
                return Err(Error::Config(format!(
                    "backend '{}' image_marker cannot be empty",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_validate() {
        for profile in BackendProfile::builtin() {
            profile.validate().unwrap();
        }
    }

    #[test]
    fn test_octave_profile() {
        let octave = BackendProfile::octave();
        assert_eq!(octave.name, "octave");
        assert!(octave.args.contains(&"--persist".to_string()));
        assert!(octave.has_capability(Capability::SyntaxHelp));
        assert!(!octave.has_capability(Capability::LatexOutput));
        assert_eq!(octave.extensions.history().unwrap().last_result(), "ans");
        match &octave.framing {
            FramingConfig::NumberedPrompt {
                skip_check_exempt, ..
            } => assert_eq!(skip_check_exempt, &vec!["completion_matches".to_string()]),
            other => panic!("unexpected framing: {other:?}"),
        }
    }

    #[test]
    fn test_scilab_profile() {
        let scilab = BackendProfile::scilab();
        assert!(matches!(scilab.framing, FramingConfig::Sentinel { .. }));
        let script = scilab.extensions.script().unwrap();
        assert_eq!(script.run_external_script("a.sce"), "exec(\"a.sce\", -1)");
        assert_eq!(
            scilab
                .extensions
                .variable_management()
                .unwrap()
                .save_variables("ws.sod"),
            "save('ws.sod');"
        );
    }

    #[test]
    fn test_noop_regex_is_anchored() {
        let re = BackendProfile::octave().noop_regex().unwrap().unwrap();
        assert!(re.is_match(";"));
        assert!(re.is_match(",;,"));
        assert!(!re.is_match("a;"));
        assert!(!re.is_match(""));
    }

    #[test]
    fn test_help_command_detection() {
        let octave = BackendProfile::octave();
        assert!(octave.is_help_command("help sin"));
        assert!(octave.is_help_command("x = 1; help(\"cos\")"));
        assert!(!octave.is_help_command("helper(1)"));
    }

    #[test]
    fn test_autorun_command() {
        let mut octave = BackendProfile::octave();
        assert_eq!(octave.autorun_command(), None);
        octave.autorun_scripts = vec!["format long".to_string(), "pkg load signal".to_string()];
        assert_eq!(
            octave.autorun_command().as_deref(),
            Some("format long\npkg load signal")
        );
    }

    #[test]
    fn test_octave_integrates_plots() {
        let octave = BackendProfile::octave();
        assert!(octave.has_capability(Capability::IntegratedPlots));
        assert_eq!(
            octave.image_marker.as_deref(),
            Some("CANTOR_OCTAVE_PLOT_FILE:")
        );

        let prepared = octave.prepare_command("plot(1:3)");
        assert!(prepared.starts_with("plot(1:3), __cantor_plot__ = "));
        assert!(prepared.contains("print('-dpng', __cantor_plot__);"));
        assert!(!prepared.contains('\n'));

        let prepared = octave.prepare_command("surf(peaks);");
        assert!(prepared.starts_with("surf(peaks); __cantor_plot__"));
    }

    #[test]
    fn test_prepare_command_leaves_other_commands_alone() {
        let mut octave = BackendProfile::octave();
        assert_eq!(octave.prepare_command("x = 1"), "x = 1");
        assert_eq!(octave.prepare_command("plotyy_data = 2"), "plotyy_data = 2");
        assert_eq!(octave.prepare_command("help plot"), "help plot");

        octave.capabilities.remove(&Capability::IntegratedPlots);
        assert_eq!(octave.prepare_command("plot(1:3)"), "plot(1:3)");
    }

    #[test]
    fn test_sync_statement_needs_marker() {
        let mut framing = FramingConfig::numbered_prompt("P:([0-9]+)> ", None);
        if let FramingConfig::NumberedPrompt { sync_statement, .. } = &mut framing {
            *sync_statement = Some("disp('sync')".to_string());
        }
        assert!(matches!(framing.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_prompt_without_capture_group_rejected() {
        let framing = FramingConfig::numbered_prompt("PROMPT> ", None);
        assert!(matches!(
            framing.validate(),
            Err(Error::InvalidPattern { .. })
        ));
    }

    #[test]
    fn test_invalid_prompt_regex_rejected() {
        let profile = BackendProfile::new(
            "broken",
            "sh",
            FramingConfig::numbered_prompt("P:([0-9]+> ", None),
        );
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_sentinel_markers_must_differ() {
        let framing = FramingConfig::sentinel("M", "M", "S", "echo {marker}");
        assert!(framing.validate().is_err());

        let framing = FramingConfig::sentinel("B", "E", "S", "echo marker");
        assert!(framing.validate().is_err());
    }

    #[test]
    fn test_empty_program_rejected() {
        let profile = BackendProfile::new("x", " ", FramingConfig::numbered_prompt("P([0-9]+)", None));
        assert!(matches!(profile.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_profile_yaml_defaults() {
        let yaml = r#"
name: bc
program: /usr/bin/bc
framing:
  type: sentinel
  begin: BEGIN
  end: END
  sync: SYNC
  print_template: 'print "{marker}\n"'
"#;
        let profile: BackendProfile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(profile.transport, TransportKind::Pipe);
        assert_eq!(profile.exit_command, "exit\n");
        assert!(profile.capabilities.is_empty());
        profile.validate().unwrap();
    }
}
