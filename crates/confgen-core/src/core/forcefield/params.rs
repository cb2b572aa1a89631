use crate::core::models::element::Element;
use phf::{Map, phf_map};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Per-element parameters of the valence force field.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct ElementParams {
    /// Covalent radius in Å; bond rest lengths are sums of these.
    pub covalent_radius: f64,
    /// Lennard-Jones minimum-energy radius contribution in Å.
    pub vdw_radius: f64,
    /// Lennard-Jones well depth in kcal/mol.
    pub well_depth: f64,
}

impl ElementParams {
    /// Parameters derived from the element's tabulated radii with a shallow well.
    pub fn generic(element: Element) -> Self {
        Self {
            covalent_radius: element.covalent_radius(),
            vdw_radius: element.vdw_radius(),
            well_depth: 0.05,
        }
    }
}

static ELEMENT_PARAMS: Map<&'static str, ElementParams> = phf_map! {
    "H" => ElementParams { covalent_radius: 0.31, vdw_radius: 1.10, well_depth: 0.020 },
    "B" => ElementParams { covalent_radius: 0.84, vdw_radius: 1.92, well_depth: 0.095 },
    "C" => ElementParams { covalent_radius: 0.76, vdw_radius: 1.70, well_depth: 0.086 },
    "N" => ElementParams { covalent_radius: 0.71, vdw_radius: 1.55, well_depth: 0.170 },
    "O" => ElementParams { covalent_radius: 0.66, vdw_radius: 1.52, well_depth: 0.210 },
    "F" => ElementParams { covalent_radius: 0.57, vdw_radius: 1.47, well_depth: 0.061 },
    "Si" => ElementParams { covalent_radius: 1.11, vdw_radius: 2.10, well_depth: 0.402 },
    "P" => ElementParams { covalent_radius: 1.07, vdw_radius: 1.80, well_depth: 0.200 },
    "S" => ElementParams { covalent_radius: 1.05, vdw_radius: 1.80, well_depth: 0.250 },
    "Cl" => ElementParams { covalent_radius: 1.02, vdw_radius: 1.75, well_depth: 0.265 },
    "Se" => ElementParams { covalent_radius: 1.20, vdw_radius: 1.90, well_depth: 0.291 },
    "Br" => ElementParams { covalent_radius: 1.20, vdw_radius: 1.85, well_depth: 0.320 },
    "I" => ElementParams { covalent_radius: 1.39, vdw_radius: 1.98, well_depth: 0.400 },
};

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct GlobalParams {
    /// Harmonic bond constant in kcal/mol/Å².
    pub bond_force: f64,
    /// Angle constant in kcal/mol per squared cosine deviation.
    pub angle_force: f64,
    /// Scale applied to Lennard-Jones between atoms exactly three bonds apart.
    pub one_four_scale: f64,
    /// Lennard-Jones pairs farther apart than this are skipped (Å).
    pub nonbonded_cutoff: f64,
}

impl Default for GlobalParams {
    fn default() -> Self {
        Self {
            bond_force: 350.0,
            angle_force: 80.0,
            one_four_scale: 0.5,
            nonbonded_cutoff: 12.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ParamFile {
    #[serde(default)]
    globals: Option<GlobalParams>,
    #[serde(default)]
    elements: HashMap<String, ElementParams>,
}

#[derive(Debug, Error)]
pub enum ParamLoadError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Unknown element '{symbol}' in '{path}'")]
    UnknownElement { path: String, symbol: String },
}

/// Parameter set of the valence force field: the compiled-in element table,
/// optionally overridden from a TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct ForceFieldParams {
    pub globals: GlobalParams,
    elements: HashMap<Element, ElementParams>,
}

impl ForceFieldParams {
    pub fn builtin() -> Self {
        let elements = ELEMENT_PARAMS
            .entries()
            .filter_map(|(symbol, params)| symbol.parse().ok().map(|e: Element| (e, *params)))
            .collect();
        Self {
            globals: GlobalParams::default(),
            elements,
        }
    }

    /// Built-in parameters with the entries of a TOML file layered on top.
    ///
    /// ```toml
    /// [globals]
    /// bond_force = 300.0
    ///
    /// [elements.Zn]
    /// covalent_radius = 1.22
    /// vdw_radius = 1.39
    /// well_depth = 0.124
    /// ```
    pub fn load(path: &Path) -> Result<Self, ParamLoadError> {
        let path_str = path.to_string_lossy().to_string();
        let content = std::fs::read_to_string(path).map_err(|e| ParamLoadError::Io {
            path: path_str.clone(),
            source: e,
        })?;
        let file: ParamFile = toml::from_str(&content).map_err(|e| ParamLoadError::Toml {
            path: path_str.clone(),
            source: e,
        })?;

        let mut params = Self::builtin();
        if let Some(globals) = file.globals {
            params.globals = globals;
        }
        for (symbol, element_params) in file.elements {
            let element: Element = symbol.parse().map_err(|_| ParamLoadError::UnknownElement {
                path: path_str.clone(),
                symbol: symbol.clone(),
            })?;
            params.elements.insert(element, element_params);
        }
        Ok(params)
    }

    pub fn element(&self, element: Element) -> Option<&ElementParams> {
        self.elements.get(&element)
    }

    /// Parameters for `element`, falling back to [`ElementParams::generic`].
    pub fn element_or_generic(&self, element: Element) -> ElementParams {
        self.element(element)
            .copied()
            .unwrap_or_else(|| ElementParams::generic(element))
    }
}

impl Default for ForceFieldParams {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn builtin_covers_organic_elements_but_not_metals() {
        let params = ForceFieldParams::builtin();
        for element in [Element::H, Element::C, Element::N, Element::O, Element::S] {
            assert!(params.element(element).is_some(), "{element} missing");
        }
        assert!(params.element(Element::Na).is_none());
        assert_eq!(
            params.element_or_generic(Element::Na).vdw_radius,
            Element::Na.vdw_radius()
        );
    }

    #[test]
    fn load_overrides_globals_and_adds_elements() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ff.toml");
        let mut file = File::create(&path).unwrap();
        writeln!(
            file,
            r#"
            [globals]
            bond_force = 200.0
            [elements.Zn]
            covalent_radius = 1.22
            vdw_radius = 1.39
            well_depth = 0.124
            "#
        )
        .unwrap();

        let params = ForceFieldParams::load(&path).unwrap();
        assert_eq!(params.globals.bond_force, 200.0);
        assert_eq!(params.globals.angle_force, GlobalParams::default().angle_force);
        assert_eq!(params.element(Element::Zn).unwrap().covalent_radius, 1.22);
        assert!(params.element(Element::C).is_some());
    }

    #[test]
    fn load_rejects_unknown_element_symbols() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ff.toml");
        std::fs::write(
            &path,
            "[elements.Xx]\ncovalent_radius = 1.0\nvdw_radius = 1.0\nwell_depth = 0.1\n",
        )
        .unwrap();
        assert!(matches!(
            ForceFieldParams::load(&path),
            Err(ParamLoadError::UnknownElement { .. })
        ));
    }

    #[test]
    fn load_fails_for_missing_file() {
        let result = ForceFieldParams::load(Path::new("/nonexistent/ff.toml"));
        assert!(matches!(result, Err(ParamLoadError::Io { .. })));
    }
}
