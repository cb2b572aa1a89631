use super::config::ForceFieldSettings;
use crate::core::forcefield::oracle::ForceFieldFactory;
use crate::core::forcefield::params::{ForceFieldParams, ParamLoadError};
use crate::core::forcefield::valence::ValenceFactory;
use crate::core::library::format::LibraryIoError;
use crate::core::library::store::FragmentLibrary;
use crate::core::torsions::library::{Composition, TorsionLibrary, TorsionLoadError, TorsionRuleSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Failed to load torsion rules: {0}")]
    Torsions(#[from] TorsionLoadError),
    #[error("Failed to load force-field parameters: {0}")]
    Parameters(#[from] ParamLoadError),
    #[error("Failed to load fragment library: {0}")]
    Library(#[from] LibraryIoError),
}

/// The shared resources every generator in a process works against.
///
/// Built once at startup and handed to each worker by cloning the handle; the fragment
/// library behind it is a single shared object, the torsion rules and force-field
/// factory are immutable.
#[derive(Clone)]
pub struct LibraryRegistry {
    pub fragments: Option<Arc<FragmentLibrary>>,
    pub torsions: Arc<TorsionLibrary>,
    pub forcefield: Arc<dyn ForceFieldFactory>,
}

impl LibraryRegistry {
    /// Built-in torsion rules, built-in force-field parameters and an empty in-memory
    /// fragment library.
    pub fn builtin() -> Result<Self, RegistryError> {
        Ok(Self {
            fragments: Some(Arc::new(FragmentLibrary::new())),
            torsions: Arc::new(TorsionLibrary::builtin()?),
            forcefield: forcefield_from_settings(&ForceFieldSettings::default())?,
        })
    }

    /// Like [`builtin`](Self::builtin) with the force field chosen by `settings`.
    pub fn from_settings(settings: &ForceFieldSettings) -> Result<Self, RegistryError> {
        Ok(Self {
            forcefield: forcefield_from_settings(settings)?,
            ..Self::builtin()?
        })
    }

    pub fn with_fragment_library(mut self, library: Arc<FragmentLibrary>) -> Self {
        self.fragments = Some(library);
        self
    }

    /// Drops the fragment library; fragments are then only cached per molecule.
    pub fn without_fragment_library(mut self) -> Self {
        self.fragments = None;
        self
    }

    pub fn with_torsions(mut self, torsions: TorsionLibrary) -> Self {
        self.torsions = Arc::new(torsions);
        self
    }

    pub fn with_forcefield(mut self, forcefield: Arc<dyn ForceFieldFactory>) -> Self {
        self.forcefield = forcefield;
        self
    }

    /// Adds a torsion rule file on top of (or instead of) the current rules.
    pub fn add_torsion_file(
        mut self,
        path: &Path,
        composition: Composition,
    ) -> Result<Self, RegistryError> {
        let set = TorsionRuleSet::load(path)?;
        info!(path = %path.display(), rules = set.rules.len(), ?composition, "Loaded torsion library");
        let mut torsions = (*self.torsions).clone();
        torsions.add(set, composition);
        self.torsions = Arc::new(torsions);
        Ok(self)
    }

    /// Loads a fragment library file into the shared library. `Replacement` clears
    /// the entries loaded so far; `Additional` keeps the first entry per fingerprint.
    pub fn add_fragment_file(
        mut self,
        path: &Path,
        composition: Composition,
    ) -> Result<Self, RegistryError> {
        let library = match (&self.fragments, composition) {
            (Some(existing), Composition::Additional) => Arc::clone(existing),
            _ => {
                let fresh = Arc::new(FragmentLibrary::new());
                self.fragments = Some(Arc::clone(&fresh));
                fresh
            }
        };
        library.load_path(path)?;
        Ok(self)
    }
}

/// The built-in valence force field with parameters chosen by `settings`.
pub fn forcefield_from_settings(
    settings: &ForceFieldSettings,
) -> Result<Arc<dyn ForceFieldFactory>, ParamLoadError> {
    let params = match &settings.params_path {
        Some(path) => ForceFieldParams::load(path)?,
        None => ForceFieldParams::builtin(),
    };
    Ok(Arc::new(ValenceFactory {
        params: Arc::new(params),
        kind: settings.kind,
        strict: settings.strict,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::library::entry::FragmentEntry;
    use std::io::Write;

    #[test]
    fn builtin_registry_has_rules_and_an_empty_library() {
        let registry = LibraryRegistry::builtin().unwrap();
        assert!(registry.torsions.rule_count() > 0);
        assert!(registry.fragments.as_ref().is_some_and(|l| l.is_empty()));
        let cloned = registry.clone();
        assert!(Arc::ptr_eq(
            registry.fragments.as_ref().unwrap(),
            cloned.fragments.as_ref().unwrap()
        ));
        assert!(registry.without_fragment_library().fragments.is_none());
    }

    #[test]
    fn fragment_files_are_added_or_replace_the_library() {
        let source = FragmentLibrary::new();
        source.insert(11, FragmentEntry::new(vec![1], vec![], 1));
        let file = tempfile::NamedTempFile::new().unwrap();
        source.save_path(file.path()).unwrap();

        let registry = LibraryRegistry::builtin().unwrap();
        let shared = Arc::clone(registry.fragments.as_ref().unwrap());
        shared.insert(22, FragmentEntry::new(vec![2], vec![], 1));

        let added = registry
            .clone()
            .add_fragment_file(file.path(), Composition::Additional)
            .unwrap();
        assert!(Arc::ptr_eq(added.fragments.as_ref().unwrap(), &shared));
        assert_eq!(shared.fingerprints(), vec![11, 22]);

        let replaced = registry
            .add_fragment_file(file.path(), Composition::Replacement)
            .unwrap();
        assert_eq!(replaced.fragments.as_ref().unwrap().fingerprints(), vec![11]);
    }

    #[test]
    fn torsion_files_extend_the_rules() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"name = "extra"

[[categories]]
name = "ethers"
level = "specific"

[[categories.rules]]
pattern = "C.3-O.3"
angles = [180.0]
"#
        )
        .unwrap();
        let registry = LibraryRegistry::builtin().unwrap();
        let before = registry.torsions.rule_count();
        let extended = registry
            .clone()
            .add_torsion_file(file.path(), Composition::Additional)
            .unwrap();
        assert_eq!(extended.torsions.rule_count(), before + 1);
        let replaced = registry
            .add_torsion_file(file.path(), Composition::Replacement)
            .unwrap();
        assert_eq!(replaced.torsions.rule_count(), 1);
        assert_eq!(replaced.torsions.library_names(), vec!["extra"]);
    }

    #[test]
    fn missing_parameter_file_is_reported() {
        let settings = ForceFieldSettings {
            params_path: Some("/nonexistent/params.toml".into()),
            ..ForceFieldSettings::default()
        };
        assert!(matches!(
            forcefield_from_settings(&settings),
            Err(ParamLoadError::Io { .. })
        ));
    }
}
