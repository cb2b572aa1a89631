use super::traits::{MoleculeSink, MoleculeSource, OutputStream};
use crate::core::chem::repair::expected_implicit_hydrogens;
use crate::core::models::atom::{Atom, Chirality};
use crate::core::models::conformer::Conformer;
use crate::core::models::element::Element;
use crate::core::models::molecule::{Molecule, MoleculeError};
use crate::core::models::topology::BondOrder;
use nalgebra::Point3;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Data field holding the energy of an exported conformer.
pub const ENERGY_FIELD: &str = "confgen.energy";
/// Data field holding the 1-based conformer number of an exported record.
pub const CONFORMER_FIELD: &str = "confgen.conformer";

#[derive(Debug, Error)]
pub enum SdfError {
    #[error("Failed to access SD file '{path}': {source}")]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("I/O error while reading or writing SD data: {0}")]
    Io(#[from] io::Error),
    #[error("Failed to parse SD record at line {line}: {details}")]
    Parse { line: usize, details: String },
    #[error("Invalid structure in SD record '{name}': {source}")]
    Structure {
        name: String,
        #[source]
        source: MoleculeError,
    },
}

impl SdfError {
    fn parse(line: usize, details: impl Into<String>) -> Self {
        Self::Parse {
            line,
            details: details.into(),
        }
    }
}

/// Reads consecutive records from an SD file.
///
/// Every record is read up to its `$$$$` terminator before it is parsed, so a
/// malformed record yields an error and the next call continues with the record
/// after it.
pub struct SdfReader<R> {
    reader: R,
    line_no: usize,
    done: bool,
}

impl SdfReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self, SdfError> {
        let file = File::open(path).map_err(|source| SdfError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> SdfReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            done: false,
        }
    }

    /// Reads the next record. Returns `Ok(None)` at end of input.
    pub fn read_record(&mut self) -> Result<Option<Molecule>, SdfError> {
        let block = match self.next_block()? {
            Some(block) => block,
            None => return Ok(None),
        };
        parse_record(&block).map(Some)
    }

    fn next_block(&mut self) -> Result<Option<Vec<(usize, String)>>, SdfError> {
        if self.done {
            return Ok(None);
        }
        let mut block = Vec::new();
        let mut raw = Vec::new();
        loop {
            raw.clear();
            if self.reader.read_until(b'\n', &mut raw)? == 0 {
                self.done = true;
                break;
            }
            self.line_no += 1;
            // Vendor data fields are often Latin-1; a bad byte must not split the record.
            let line = String::from_utf8_lossy(&raw);
            let content = line.trim_end_matches(['\r', '\n']);
            if content.trim() == "$$$$" {
                return Ok(Some(block));
            }
            block.push((self.line_no, content.to_string()));
        }
        if block.iter().all(|(_, l)| l.trim().is_empty()) {
            Ok(None)
        } else {
            Ok(Some(block))
        }
    }
}

impl<R: BufRead> Iterator for SdfReader<R> {
    type Item = Result<Molecule, SdfError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

impl<R: BufRead + Send> MoleculeSource for SdfReader<R> {
    fn next_molecule(&mut self) -> Option<Result<Molecule, SdfError>> {
        self.next()
    }
}

/// Reads every record of an SD file, failing on the first malformed record.
pub fn read_all(path: &Path) -> Result<Vec<Molecule>, SdfError> {
    SdfReader::open(path)?.collect()
}

fn parse_record(block: &[(usize, String)]) -> Result<Molecule, SdfError> {
    if block.len() < 4 {
        let line = block.last().map(|(ln, _)| *ln).unwrap_or(0);
        return Err(SdfError::parse(
            line,
            "record must contain a header and a counts line",
        ));
    }
    let mut molecule = Molecule::new(block[0].1.trim());

    let (counts_no, counts) = (&block[3].0, &block[3].1);
    if counts.contains("V3000") {
        return Err(SdfError::parse(*counts_no, "V3000 is not supported"));
    }
    let atom_count = fixed_field(counts, 0, 3)
        .parse::<usize>()
        .map_err(|_| SdfError::parse(*counts_no, "invalid atom count"))?;
    let bond_count = fixed_field(counts, 3, 6)
        .parse::<usize>()
        .map_err(|_| SdfError::parse(*counts_no, "invalid bond count"))?;

    let atom_start = 4;
    let bond_start = atom_start + atom_count;
    let props_start = bond_start + bond_count;
    if block.len() < props_start {
        return Err(SdfError::parse(
            block.last().map(|(ln, _)| *ln).unwrap_or(*counts_no),
            "record ended before atoms and bonds were fully specified",
        ));
    }

    for (ln, raw) in &block[atom_start..bond_start] {
        molecule.add_atom(parse_atom(*ln, raw)?);
    }

    let mut aromatic_atoms = Vec::new();
    for (ln, raw) in &block[bond_start..props_start] {
        let (a1, a2, order) = parse_bond(*ln, raw, atom_count)?;
        molecule
            .add_bond(a1, a2, order)
            .map_err(|source| SdfError::Structure {
                name: molecule.name.clone(),
                source,
            })?;
        if order == BondOrder::Aromatic {
            aromatic_atoms.extend([a1, a2]);
        }
    }
    for atom in aromatic_atoms {
        molecule.atom_mut(atom).aromatic = true;
    }

    let mut saw_charge_block = false;
    let mut index = props_start;
    while index < block.len() {
        let (ln, raw) = (&block[index].0, &block[index].1);
        index += 1;
        if raw.starts_with("M  END") {
            break;
        }
        if raw.starts_with("M  CHG") {
            if !saw_charge_block {
                for atom in 0..molecule.atom_count() {
                    molecule.atom_mut(atom).formal_charge = 0;
                }
                saw_charge_block = true;
            }
            apply_charge_line(&mut molecule, *ln, raw)?;
        }
    }

    while index < block.len() {
        let raw = &block[index].1;
        index += 1;
        let Some(name) = data_field_name(raw) else {
            continue;
        };
        let mut value = Vec::new();
        while index < block.len() && !block[index].1.trim().is_empty() {
            value.push(block[index].1.as_str());
            index += 1;
        }
        molecule.properties.insert(name, value.join("\n"));
    }

    for atom in 0..molecule.atom_count() {
        if molecule.atom(atom).is_hydrogen() {
            continue;
        }
        if let Some(count) = expected_implicit_hydrogens(&molecule, atom) {
            molecule.atom_mut(atom).implicit_hydrogens = count;
        }
    }
    Ok(molecule)
}

fn fixed_field(line: &str, start: usize, end: usize) -> &str {
    let end = end.min(line.len());
    if start >= end {
        return "";
    }
    line.get(start..end).unwrap_or("").trim()
}

fn parse_atom(ln: usize, raw: &str) -> Result<Atom, SdfError> {
    let padded = format!("{raw:<48}");
    let column = |start: usize, end: usize| padded.get(start..end).unwrap_or("").trim();
    let coord = |start: usize, end: usize, axis: &str| {
        column(start, end)
            .parse::<f64>()
            .map_err(|_| SdfError::parse(ln, format!("invalid {axis} coordinate in atom line")))
    };
    let position = Point3::new(coord(0, 10, "x")?, coord(10, 20, "y")?, coord(20, 30, "z")?);
    let symbol = column(31, 34);
    let element = symbol
        .parse::<Element>()
        .map_err(|_| SdfError::parse(ln, format!("unsupported element '{symbol}'")))?;

    let mut atom = Atom::new(element, position);
    atom.formal_charge = match column(36, 39) {
        "1" => 3,
        "2" => 2,
        "3" => 1,
        "5" => -1,
        "6" => -2,
        "7" => -3,
        _ => 0,
    };
    let parity = column(39, 42).parse::<u8>().unwrap_or(0);
    atom.chirality = Chirality::from_mdl_parity(parity);
    Ok(atom)
}

fn parse_bond(ln: usize, raw: &str, atom_count: usize) -> Result<(usize, usize, BondOrder), SdfError> {
    let field = |start: usize, end: usize, what: &str| {
        fixed_field(raw, start, end)
            .parse::<usize>()
            .map_err(|_| SdfError::parse(ln, format!("invalid {what} in bond line")))
    };
    let a1 = field(0, 3, "first atom index")?;
    let a2 = field(3, 6, "second atom index")?;
    let code = field(6, 9, "bond type")?;
    if a1 == 0 || a2 == 0 || a1 > atom_count || a2 > atom_count {
        return Err(SdfError::parse(
            ln,
            "bond references atom outside declared range",
        ));
    }
    let order = u8::try_from(code)
        .ok()
        .and_then(BondOrder::from_ctfile)
        .ok_or_else(|| SdfError::parse(ln, format!("unsupported bond type {code}")))?;
    Ok((a1 - 1, a2 - 1, order))
}

fn apply_charge_line(molecule: &mut Molecule, ln: usize, raw: &str) -> Result<(), SdfError> {
    let tokens: Vec<&str> = raw.split_whitespace().skip(2).collect();
    let count = tokens
        .first()
        .and_then(|t| t.parse::<usize>().ok())
        .ok_or_else(|| SdfError::parse(ln, "invalid entry count in charge line"))?;
    let end = count
        .checked_mul(2)
        .and_then(|n| n.checked_add(1))
        .filter(|&end| end <= tokens.len())
        .ok_or_else(|| SdfError::parse(ln, "charge line has fewer entries than declared"))?;
    for pair in tokens[1..end].chunks(2) {
        let atom = pair[0]
            .parse::<usize>()
            .ok()
            .filter(|&a| a >= 1 && a <= molecule.atom_count())
            .ok_or_else(|| SdfError::parse(ln, "charge line references an unknown atom"))?;
        let charge = pair[1]
            .parse::<i8>()
            .map_err(|_| SdfError::parse(ln, "invalid charge value"))?;
        molecule.atom_mut(atom - 1).formal_charge = charge;
    }
    Ok(())
}

fn data_field_name(line: &str) -> Option<String> {
    if !line.starts_with('>') {
        return None;
    }
    let start = line.find('<')?;
    let end = line[start + 1..].find('>')? + start + 1;
    Some(line[start + 1..end].to_string())
}

/// Writes molecules as SD records.
///
/// In multi-conformer mode each conformer becomes its own record carrying
/// [`ENERGY_FIELD`] and [`CONFORMER_FIELD`]; otherwise only the lowest-energy
/// conformer of a molecule is written.
pub struct SdfWriter<W: Write> {
    writer: W,
    multi_conformer: bool,
    records: usize,
}

impl SdfWriter<BufWriter<File>> {
    pub fn create(path: &Path, multi_conformer: bool) -> Result<Self, SdfError> {
        let file = File::create(path).map_err(|source| SdfError::File {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(BufWriter::new(file), multi_conformer))
    }
}

impl<W: Write> SdfWriter<W> {
    pub fn new(writer: W, multi_conformer: bool) -> Self {
        Self {
            writer,
            multi_conformer,
            records: 0,
        }
    }

    /// Number of records written so far.
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    /// Writes one record using `coords` in place of the atoms' own positions.
    pub fn write_record(
        &mut self,
        molecule: &Molecule,
        coords: &[Point3<f64>],
        extra: &[(&str, String)],
    ) -> Result<(), SdfError> {
        let w = &mut self.writer;
        writeln!(w, "{}", molecule.name)?;
        writeln!(w, "  {:<8}{:<10}3D", "confgen", "")?;
        writeln!(w)?;
        writeln!(
            w,
            "{:>3}{:>3}  0  0  0  0  0  0  0  0999 V2000",
            molecule.atom_count(),
            molecule.bond_count()
        )?;
        for (atom, p) in molecule.atoms().iter().zip(coords) {
            writeln!(
                w,
                "{:>10.4}{:>10.4}{:>10.4} {:<3} 0{:>3}{:>3}  0  0  0  0  0  0  0  0  0",
                p.x,
                p.y,
                p.z,
                atom.element.symbol(),
                charge_code(atom.formal_charge),
                atom.chirality.to_mdl_parity()
            )?;
        }
        for bond in molecule.bonds() {
            writeln!(
                w,
                "{:>3}{:>3}{:>3}  0  0  0  0",
                bond.atom1 + 1,
                bond.atom2 + 1,
                bond.order.to_ctfile()
            )?;
        }
        let charged: Vec<(usize, i8)> = molecule
            .atoms()
            .iter()
            .enumerate()
            .filter(|(_, a)| a.formal_charge != 0)
            .map(|(i, a)| (i + 1, a.formal_charge))
            .collect();
        for chunk in charged.chunks(8) {
            write!(w, "M  CHG{:>3}", chunk.len())?;
            for (atom, charge) in chunk {
                write!(w, " {atom:>3} {charge:>3}")?;
            }
            writeln!(w)?;
        }
        writeln!(w, "M  END")?;
        for (name, value) in &molecule.properties {
            if extra.iter().any(|(n, _)| n == name) {
                continue;
            }
            writeln!(w, "> <{name}>\n{value}\n")?;
        }
        for (name, value) in extra {
            writeln!(w, "> <{name}>\n{value}\n")?;
        }
        writeln!(w, "$$$$")?;
        self.records += 1;
        Ok(())
    }
}

fn charge_code(charge: i8) -> u8 {
    match charge {
        3 => 1,
        2 => 2,
        1 => 3,
        -1 => 5,
        -2 => 6,
        -3 => 7,
        _ => 0,
    }
}

impl<W: Write + Send> MoleculeSink for SdfWriter<W> {
    fn write(
        &mut self,
        molecule: &Molecule,
        conformers: &[Conformer],
        stream: OutputStream,
    ) -> Result<(), SdfError> {
        if stream == OutputStream::Failed || conformers.is_empty() {
            let coords = conformers
                .first()
                .map(|c| c.coords.clone())
                .unwrap_or_else(|| molecule.positions());
            return self.write_record(molecule, &coords, &[]);
        }
        let count = if self.multi_conformer {
            conformers.len()
        } else {
            1
        };
        for (index, conformer) in conformers.iter().take(count).enumerate() {
            let extra = [
                (ENERGY_FIELD, format!("{:.4}", conformer.energy)),
                (CONFORMER_FIELD, (index + 1).to_string()),
            ];
            self.write_record(molecule, &conformer.coords, &extra)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SdfError> {
        self.writer.flush()?;
        Ok(())
    }
}
