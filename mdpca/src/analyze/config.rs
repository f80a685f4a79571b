use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use shared::{
    log,
    range_parse,
    bail,
    Result,
};

use crate::core::{
    AnalysisConfig,
    ReflectionPolicy,
    NM_TO_ANG,
};


#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalyzeConfig {
    // `.trr` or `.trr.gz` holding positions and boxes of every frame.
    trajectory_fname: PathBuf,

    // Forces co-indexed with the trajectory. If absent, the forces stored in `trajectory_fname`
    // are used when every frame has them.
    forces_fname: Option<PathBuf>,

    // Alignment target, the first frame of this file is used. Defaults to the first
    // (unwrapped) frame of the trajectory.
    reference_fname: Option<PathBuf>,

    // Atoms used for the superposition. Ranges and integers separated by whitespace,
    // counted from 1, negative values count from the end, "0" selects every atom.
    //
    // EXAMPLE: "1..50 60 -1"
    #[serde(default = "AnalyzeConfig::default_selection")]
    fit_selection: String,

    // Atoms entering the PCA and RMSF, same syntax as `fit_selection`. Defaults to it.
    report_selection: Option<String>,

    // Frames before this index form the training block. Defaults to 80 % of the frames.
    split_index: Option<usize>,

    #[serde(default = "AnalyzeConfig::default_n_components")]
    n_components: usize,

    #[serde(default)]
    reflection: ReflectionPolicy,

    // Multiplies RMSD, RMSF and radius of gyration. 10.0 converts nm into Angstrom.
    #[serde(default = "AnalyzeConfig::default_unit_scale")]
    unit_scale: f64,

    // Principal coordinate analysis of the pairwise RMSD matrix, O(nframes^2).
    #[serde(default)]
    pairwise: bool,

    // Double-centre the squared pairwise RMSD (true) or the plain RMSD matrix (false).
    #[serde(default = "AnalyzeConfig::default_pcoa_squared")]
    pcoa_squared: bool,

    #[serde(default = "AnalyzeConfig::default_outdir")]
    outdir: PathBuf,
}


fn reflection_str(r: ReflectionPolicy) -> &'static str {
    match r {
        ReflectionPolicy::Proper        => "proper",
        ReflectionPolicy::AllowImproper => "improper",
    }
}


impl AnalyzeConfig {
    fn default_selection() -> String { "0".into() }
    fn default_n_components() -> usize { 10 }
    fn default_unit_scale() -> f64 { NM_TO_ANG }
    fn default_pcoa_squared() -> bool { true }
    fn default_outdir() -> PathBuf { PathBuf::from("output") }

    pub fn get_trajectory_fname(&self) -> &PathBuf { &self.trajectory_fname }
    pub fn get_forces_fname(&self) -> Option<&PathBuf> { self.forces_fname.as_ref() }
    pub fn get_reference_fname(&self) -> Option<&PathBuf> { self.reference_fname.as_ref() }
    pub fn get_fit_selection(&self) -> &str { &self.fit_selection }
    pub fn get_report_selection(&self) -> &str {
        self.report_selection.as_deref().unwrap_or(&self.fit_selection)
    }
    pub fn get_n_components(&self) -> usize { self.n_components }
    pub fn get_reflection(&self) -> ReflectionPolicy { self.reflection }
    pub fn get_unit_scale(&self) -> f64 { self.unit_scale }
    pub fn get_pairwise(&self) -> bool { self.pairwise }
    pub fn get_pcoa_squared(&self) -> bool { self.pcoa_squared }
    pub fn get_outdir(&self) -> &PathBuf { &self.outdir }

    /// Training block size for a trajectory of `nframes` frames.
    pub fn get_split_index(&self, nframes: usize) -> usize {
        self.split_index.unwrap_or_else(|| (nframes * 4 / 5).clamp(1.min(nframes), nframes))
    }

    pub fn set_outdir(&mut self, outdir: impl AsRef<Path>) {
        self.outdir = outdir.as_ref().to_path_buf();
    }


    pub fn print_to_log(&self) {
        let input_print = format!("{}", self);
        let hashtag_line = "#".repeat(120);
        log::info!("Input file loaded. The formatted input is:\n\n{hashtag_line}\n{}\n{hashtag_line}\n\n", input_print);
    }
}


impl Default for AnalyzeConfig {
    fn default() -> Self {
        Self {
            trajectory_fname: PathBuf::from("traj.trr"),
            forces_fname:     None,
            reference_fname:  None,
            fit_selection:    Self::default_selection(),
            report_selection: None,
            split_index:      None,
            n_components:     Self::default_n_components(),
            reflection:       ReflectionPolicy::default(),
            unit_scale:       Self::default_unit_scale(),
            pairwise:         false,
            pcoa_squared:     Self::default_pcoa_squared(),
            outdir:           Self::default_outdir(),
        }
    }
}


impl fmt::Display for AnalyzeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "# mdpca config for trajectory unwrapping, alignment and PCA")?;
        writeln!(f)?;

        writeln!(f, " {:>20} = {:?}", "trajectory_fname", self.trajectory_fname)?;
        match self.forces_fname.as_ref() {
            Some(p) => writeln!(f, " {:>20} = {:?}", "forces_fname", p)?,
            None    => writeln!(f, "#{:>20} = \"forces.trr\" # defaults to the forces in trajectory_fname", "forces_fname")?,
        }
        match self.reference_fname.as_ref() {
            Some(p) => writeln!(f, " {:>20} = {:?}", "reference_fname", p)?,
            None    => writeln!(f, "#{:>20} = \"reference.trr\" # defaults to the first frame", "reference_fname")?,
        }

        writeln!(f, " {:>20} = {:?}", "fit_selection", self.fit_selection)?;
        match self.report_selection.as_ref() {
            Some(s) => writeln!(f, " {:>20} = {:?}", "report_selection", s)?,
            None    => writeln!(f, "#{:>20} = \"1..10\" # defaults to fit_selection", "report_selection")?,
        }
        match self.split_index {
            Some(i) => writeln!(f, " {:>20} = {}", "split_index", i)?,
            None    => writeln!(f, "#{:>20} = 100 # defaults to 80% of the frames", "split_index")?,
        }

        writeln!(f, " {:>20} = {}",     "n_components", self.n_components)?;
        writeln!(f, " {:>20} = {:?}",   "reflection",   reflection_str(self.reflection))?;
        writeln!(f, " {:>20} = {:?}",   "unit_scale",   self.unit_scale)?;
        writeln!(f, " {:>20} = {}",     "pairwise",     self.pairwise)?;
        writeln!(f, " {:>20} = {}",     "pcoa_squared", self.pcoa_squared)?;
        writeln!(f, " {:>20} = {:?}",   "outdir",       self.outdir)?;

        Ok(())
    }
}


impl AnalysisConfig for AnalyzeConfig {
    fn check_config(&self) -> Result<()> {
        let mut errors: Vec<String> = vec![];

        if !self.trajectory_fname.is_file() {
            errors.push(format!("Field 'trajectory_fname' does not point to a valid file: {:?}", self.trajectory_fname));
        }

        for (key, fname) in [("forces_fname", &self.forces_fname), ("reference_fname", &self.reference_fname)] {
            if let Some(p) = fname.as_ref().filter(|p| !p.is_file()) {
                errors.push(format!("Field '{}' does not point to a valid file: {:?}", key, p));
            }
        }

        let selections = [("fit_selection", Some(&self.fit_selection)), ("report_selection", self.report_selection.as_ref())];
        for (key, sel) in selections {
            match sel.map(|s| range_parse(s)) {
                Some(Err(e)) => errors.push(format!("Field '{}' is invalid: {}", key, e)),
                Some(Ok(v)) if v.is_empty() => errors.push(format!("Field '{}' selects no atom.", key)),
                _ => (),
            }
        }

        if self.split_index == Some(0) {
            errors.push("Field 'split_index' must be positive, the training block cannot be empty.".into());
        }

        if self.n_components == 0 {
            errors.push("Field 'n_components' must be positive.".into());
        }

        if !(self.unit_scale.is_finite() && self.unit_scale > 0.0) {
            errors.push("Field 'unit_scale' must be a positive number.".into());
        }

        if self.outdir.as_os_str().is_empty() {
            errors.push("Field 'outdir' cannot be empty.".into());
        }

        if !errors.is_empty() {
            bail!("Invalid analyze config:\n  - {}", errors.join("\n  - "));
        }
        Ok(())
    }
}
