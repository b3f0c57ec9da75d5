//! Backend extensions.
//!
//! An extension turns a generic request ("run this script file", "remove
//! variable x") into a statement in the backend's own language. Lookup goes
//! through [`ExtensionKind`], so asking for an extension a backend does not
//! provide yields `None` instead of a failed downcast.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Key used to look an extension up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ExtensionKind {
    /// Running script files
    Script,
    /// Defining and clearing variables
    VariableManagement,
    /// Access to previous results
    History,
}

/// Running external script files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ScriptExtension {
    /// Statement running a script, `{path}` is replaced by the file path
    pub run_script: String,
    /// Separator between two statements on one line
    pub command_separator: String,
}

impl ScriptExtension {
    /// Statement that runs the script at `path`.
    pub fn run_external_script(&self, path: &str) -> String {
        self.run_script.replace("{path}", path)
    }
}

/// Variable management statements.
///
/// Templates use `{name}`, `{value}` and `{file}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct VariableManagementExtension {
    /// Assignment, e.g. `{name} = {value}`
    pub set_value: String,
    /// Removal of one variable
    pub remove_variable: String,
    /// Removal of every variable
    pub clear_variables: String,
    /// Saving the workspace to a file
    pub save_variables: String,
    /// Loading the workspace from a file
    pub load_variables: String,
}

impl VariableManagementExtension {
    /// Statement defining a new variable.
    pub fn add_variable(&self, name: &str, value: &str) -> String {
        self.set_value(name, value)
    }

    /// Statement assigning `value` to `name`.
    pub fn set_value(&self, name: &str, value: &str) -> String {
        self.set_value
            .replace("{name}", name)
            .replace("{value}", value)
    }

    /// Statement removing `name`.
    pub fn remove_variable(&self, name: &str) -> String {
        self.remove_variable.replace("{name}", name)
    }

    /// Statement removing every variable.
    pub fn clear_variables(&self) -> String {
        self.clear_variables.clone()
    }

    /// Statement saving the workspace to `file`.
    pub fn save_variables(&self, file: &str) -> String {
        self.save_variables.replace("{file}", file)
    }

    /// Statement loading the workspace from `file`.
    pub fn load_variables(&self, file: &str) -> String {
        self.load_variables.replace("{file}", file)
    }
}

/// Access to previous results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HistoryExtension {
    /// Expression evaluating to the last result
    pub last_result: String,
}

impl HistoryExtension {
    /// Expression evaluating to the last result.
    pub fn last_result(&self) -> &str {
        &self.last_result
    }
}

/// One extension provided by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind")]
pub enum Extension {
    /// Script running
    Script(ScriptExtension),
    /// Variable management
    VariableManagement(VariableManagementExtension),
    /// History
    History(HistoryExtension),
}

impl Extension {
    /// The lookup key of this extension.
    pub fn kind(&self) -> ExtensionKind {
        match self {
            Extension::Script(_) => ExtensionKind::Script,
            Extension::VariableManagement(_) => ExtensionKind::VariableManagement,
            Extension::History(_) => ExtensionKind::History,
        }
    }
}

/// The extensions of one backend, at most one per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ExtensionSet(Vec<Extension>);

impl ExtensionSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an extension, replacing one of the same kind.
    pub fn with(mut self, extension: Extension) -> Self {
        self.insert(extension);
        self
    }

    /// Add an extension, replacing one of the same kind.
    pub fn insert(&mut self, extension: Extension) {
        let kind = extension.kind();
        self.0.retain(|e| e.kind() != kind);
        self.0.push(extension);
    }

    /// Look an extension up by kind.
    pub fn get(&self, kind: ExtensionKind) -> Option<&Extension> {
        self.0.iter().find(|e| e.kind() == kind)
    }

    /// Kinds present in this set.
    pub fn kinds(&self) -> Vec<ExtensionKind> {
        self.0.iter().map(Extension::kind).collect()
    }

    /// Script extension, if provided.
    pub fn script(&self) -> Option<&ScriptExtension> {
        match self.get(ExtensionKind::Script)? {
            Extension::Script(ext) => Some(ext),
            _ => None,
        }
    }

    /// Variable management extension, if provided.
    pub fn variable_management(&self) -> Option<&VariableManagementExtension> {
        match self.get(ExtensionKind::VariableManagement)? {
            Extension::VariableManagement(ext) => Some(ext),
            _ => None,
        }
    }

    /// History extension, if provided.
    pub fn history(&self) -> Option<&HistoryExtension> {
        match self.get(ExtensionKind::History)? {
            Extension::History(ext) => Some(ext),
            _ => None,
        }
    }

    /// Number of extensions.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no extension is provided.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn octave_like() -> ExtensionSet {
        ExtensionSet::new()
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
            }))
    }

    #[test]
    fn test_lookup_by_kind() {
        let set = octave_like();
        assert_eq!(set.len(), 2);
        assert!(set.get(ExtensionKind::Script).is_some());
        assert!(set.get(ExtensionKind::History).is_none());
        assert!(set.history().is_none());
    }

    #[test]
    fn test_script_extension() {
        let set = octave_like();
        let script = set.script().unwrap();
        assert_eq!(
            script.run_external_script("/tmp/init.m"),
            "source \"/tmp/init.m\""
        );
        assert_eq!(script.command_separator, ";");
    }

    #[test]
    fn test_variable_management_extension() {
        let set = octave_like();
        let vars = set.variable_management().unwrap();
        assert_eq!(vars.add_variable("x", "42"), "x = 42");
        assert_eq!(vars.remove_variable("x"), "clear x;");
        assert_eq!(vars.clear_variables(), "clear;");
        assert_eq!(vars.save_variables("ws.mat"), "save ws.mat;");
        assert_eq!(vars.load_variables("ws.mat"), "load ws.mat;");
    }

    #[test]
    fn test_insert_replaces_same_kind() {
        let mut set = ExtensionSet::new();
        set.insert(Extension::History(HistoryExtension {
            last_result: "ans".to_string(),
        }));
        set.insert(Extension::History(HistoryExtension {
            last_result: "%".to_string(),
        }));
        assert_eq!(set.len(), 1);
        assert_eq!(set.history().unwrap().last_result(), "%");
    }

    #[test]
    fn test_yaml_roundtrip() {
        let yaml = r#"
- kind: History
  last_result: ans
"#;
        let set: ExtensionSet = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(set.kinds(), vec![ExtensionKind::History]);
    }
}
