use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use shared::{
    ndarray as nd,
    ndarray::{s, Axis},
    bail,
    ensure,
    info,
    mean,
    warn,
    Context,
    Result,
};
use trr_parsers::Trr;

use crate::analyze::AnalyzeConfig;
use crate::core::{
    analyze,
    AnalysisInput,
    AnalysisParams,
    AtomSubset,
    BoxInput,
    Pca,
    Report,
    Scores,
    Selection,
};


/// One `analyze` run: the trajectory loaded according to the config, ready to be analysed.
pub struct Analysis {
    trajectory: Trr,
    input:      AnalysisInput,
    params:     AnalysisParams,
}


fn load_trr(fname: &Path, what: &str) -> Result<Trr> {
    info!("Reading {} from {:?} ...", what, fname);
    let trr = Trr::from_file(fname)?;
    info!("    {} frames, {} atoms, {} precision.", trr.nframes, trr.natoms, if trr.double { "double" } else { "single" });
    Ok(trr)
}


impl Analysis {
    pub fn from_config(cfg: &AnalyzeConfig) -> Result<Self> {
        let trajectory = load_trr(cfg.get_trajectory_fname(), "trajectory")?;
        let (nframes, natoms) = (trajectory.nframes, trajectory.natoms);

        let positions = trajectory.positions.clone()
            .with_context(|| format!("Trajectory {:?} has no positions in some frames.", cfg.get_trajectory_fname()))?;
        let boxes = trajectory.boxes.clone()
            .with_context(|| format!("Trajectory {:?} has no simulation box in some frames.", cfg.get_trajectory_fname()))?;

        let forces = match cfg.get_forces_fname() {
            Some(fname) => {
                let trr = load_trr(fname, "forces")?;
                ensure!(trr.nframes == nframes && trr.natoms == natoms,
                    "Forces in {:?} ({} frames, {} atoms) do not match the trajectory ({} frames, {} atoms).",
                    fname, trr.nframes, trr.natoms, nframes, natoms);
                Some(trr.forces.with_context(|| format!("No forces found in {:?}.", fname))?)
            },
            None => {
                if trajectory.forces.is_none() {
                    info!("No forces in the trajectory, only coordinates are analysed.");
                }
                trajectory.forces.clone()
            },
        };

        let reference = match cfg.get_reference_fname() {
            Some(fname) => {
                let trr = load_trr(fname, "reference structure")?;
                ensure!(trr.natoms == natoms,
                    "Reference {:?} has {} atoms while the trajectory has {}.", fname, trr.natoms, natoms);
                let pos = trr.positions
                    .with_context(|| format!("No positions found in {:?}.", fname))?;
                Some(pos.index_axis(Axis(0), 0).to_owned())
            },
            None => None,
        };

        let fit = AtomSubset::from_ranges(cfg.get_fit_selection(), natoms)
            .context("Invalid 'fit_selection'.")?;
        let report = AtomSubset::from_ranges(cfg.get_report_selection(), natoms)
            .context("Invalid 'report_selection'.")?;
        info!("{} atoms selected for fitting, {} atoms for the report.", fit.len(), report.len());

        let split_index = cfg.get_split_index(nframes);
        if split_index > nframes {
            bail!("Field 'split_index' = {} exceeds the number of frames {}.", split_index, nframes);
        }
        info!("Frames [0, {}) form the training block, [{}, {}) the held-out block.", split_index, split_index, nframes);

        let params = AnalysisParams {
            selection:    Selection::new(fit, report)?,
            split_index,
            n_components: cfg.get_n_components(),
            reflection:   cfg.get_reflection(),
            unit_scale:   cfg.get_unit_scale(),
            pairwise:     cfg.get_pairwise(),
            pcoa_squared: cfg.get_pcoa_squared(),
        };

        let input = AnalysisInput {
            positions,
            boxes: BoxInput::Matrices(boxes),
            forces,
            reference,
        };

        Ok(Self { trajectory, input, params })
    }


    pub fn params(&self) -> &AnalysisParams { &self.params }


    pub fn run(&self) -> Result<Report> {
        info!("Unwrapping, aligning and decomposing {} frames ...", self.trajectory.nframes);
        let report = analyze(&self.input, &self.params)?;

        for w in report.warnings.iter() {
            warn!("{}", w);
        }
        if let Some(avg) = mean(report.rmsd.to_vec()) {
            info!("Average RMSD to the reference: {:.4}", avg);
        }
        if let Some(ev) = report.coord_explained.iter().last() {
            info!("The first {} coordinate components explain {:.2} % of the variance.", report.coord_explained.len(), ev * 100.0);
        }

        Ok(report)
    }


    /// Write every part of `report` into `outdir`, which must exist.
    pub fn save_report(&self, report: &Report, outdir: &Path) -> Result<()> {
        ensure!(outdir.is_dir(), "Output dir {:?} does not exist.", outdir);

        let times = nd::Array1::from(self.trajectory.times.clone());
        let with_time = |values: &nd::Array1<f64>| -> Result<nd::Array2<f64>> {
            Ok(nd::stack(Axis(1), &[times.view(), values.view()])?)
        };

        let mut unwrapped = Trr::from_blocks(
            self.trajectory.boxes.clone(), Some(report.unwrapped.clone()), None, self.trajectory.double)?;
        unwrapped.steps = self.trajectory.steps.clone();
        unwrapped.times = self.trajectory.times.clone();
        info!("Writing {:?} ...", outdir.join("unwrapped.trr"));
        unwrapped.to_file(outdir.join("unwrapped.trr"))?;

        let mut aligned = Trr::from_blocks(
            None, Some(report.alignment.coords.clone()), report.alignment.forces.clone(), self.trajectory.double)?;
        aligned.steps = self.trajectory.steps.clone();
        aligned.times = self.trajectory.times.clone();
        info!("Writing {:?} ...", outdir.join("aligned.trr"));
        aligned.to_file(outdir.join("aligned.trr"))?;

        let rotations = report.alignment.rotations.view()
            .into_shape((report.alignment.rotations.len_of(Axis(0)), 9))?;
        write_table(outdir.join("rotations.txt"), "R11 R12 R13 R21 R22 R23 R31 R32 R33, aligned x = R.x", rotations)?;

        write_table(outdir.join("rmsd.txt"), "time RMSD", with_time(&report.rmsd)?.view())?;
        write_table(outdir.join("rgyr.txt"), "time radius_of_gyration", with_time(&report.rgyr)?.view())?;

        let atoms = self.params.selection.report.indices().iter()
            .map(|&i| (i + 1) as f64)
            .collect::<nd::Array1<f64>>();
        let rmsf = nd::stack(Axis(1), &[atoms.view(), report.rmsf.view()])?;
        write_table(outdir.join("rmsf.txt"), "atom(1-based) RMSF", rmsf.view())?;

        save_decomposition(outdir, "coords", &report.coord_pca, &report.coord_scores,
            report.coord_explained.view(), self.params.n_components)?;

        if let (Some(pca), Some(scores), Some(explained)) =
            (report.force_pca.as_ref(), report.force_scores.as_ref(), report.force_explained.as_ref()) {
            save_decomposition(outdir, "forces", pca, scores, explained.view(), self.params.n_components)?;
        }

        if let Some(pcoa) = report.pcoa.as_ref() {
            let header = (1 ..= pcoa.coords.ncols()).map(|i| format!("PCo{}", i)).join(" ");
            write_table(outdir.join("pcoa.txt"), &header, pcoa.coords.view())?;
            write_table(outdir.join("pcoa_eigenvalues.txt"), "eigenvalue",
                pcoa.eigenvalues.view().insert_axis(Axis(1)))?;
        }

        Ok(())
    }
}


fn save_decomposition(outdir: &Path, tag: &str, pca: &Pca, scores: &Scores,
                      explained: nd::ArrayView1<f64>, n_components: usize) -> Result<()> {
    let n = n_components.min(pca.nfeatures());

    write_table(outdir.join(format!("eigenvalues_{}.txt", tag)), "eigenvalue",
        pca.eigenvalues().insert_axis(Axis(1)))?;
    write_table(outdir.join(format!("loadings_{}.txt", tag)),
        "one column per component, rows are x1 y1 z1 x2 ...", pca.loadings().slice(s![.., .. n]))?;
    write_table(outdir.join(format!("scores_{}_training.txt", tag)), "one column per component",
        scores.training.view())?;
    write_table(outdir.join(format!("scores_{}_heldout.txt", tag)), "one column per component",
        scores.heldout.view())?;
    write_table(outdir.join(format!("explained_{}.txt", tag)), "cumulative explained variance",
        explained.insert_axis(Axis(1)))?;

    Ok(())
}


fn write_table<P>(fname: P, header: &str, table: nd::ArrayView2<f64>) -> Result<()>
where P: AsRef<Path> {
    let fname = fname.as_ref();
    info!("Writing {:?} ...", fname);
    if fname.is_file() {
        warn!("File {:?} exists, overwriting ...", fname);
    }

    let mut f = BufWriter::new(File::create(fname)?);
    writeln!(f, "# {}", header)?;
    for row in table.outer_iter() {
        writeln!(f, "{}", row.iter().map(|x| format!("{:16.8e}", x)).join(" "))?;
    }
    f.flush()?;

    Ok(())
}


/// Create `dir`, or a sibling `dir_01` ... `dir_99` when it already exists. Returns the directory
/// actually created.
pub fn create_outputdir(dir: &Path) -> Result<PathBuf> {
    if dir.is_file() {
        bail!("The output dir {:?} exists as a regular file, please change.", dir);
    }

    let name = match dir.file_name().and_then(|s| s.to_str()) {
        Some(name) => name,
        None => bail!("The output dir {:?} cannot be current working dir, please change.", dir),
    };

    let dir = if dir.exists() {
        let parent = dir.parent().unwrap_or_else(|| Path::new("."));
        let newdir = (1 ..= 99)
            .map(|i| parent.join(format!("{}_{:02}", name, i)))
            .find(|d| !d.exists());

        match newdir {
            Some(newdir) => {
                warn!("The outdir {:?} already exists and will be switched to {:?} for this run.", dir, newdir);
                newdir
            },
            None => bail!("Existed outdir reached maximum homonymy outdirs: {:?}", dir),
        }
    } else {
        dir.to_path_buf()
    };

    info!("Log and output files will be stored in {:?} .", dir);
    fs::create_dir_all(&dir)?;

    Ok(dir)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_outputdir() {
        let root = tempdir().unwrap();
        let dir = root.path().join("output");

        assert_eq!(create_outputdir(&dir).unwrap(), dir);
        assert!(dir.is_dir());
        assert_eq!(create_outputdir(&dir).unwrap(), root.path().join("output_01"));
        assert_eq!(create_outputdir(&dir).unwrap(), root.path().join("output_02"));

        let file = root.path().join("plain");
        fs::write(&file, b"").unwrap();
        assert!(create_outputdir(&file).is_err());
    }

    #[test]
    fn test_write_table() {
        let root = tempdir().unwrap();
        let fname = root.path().join("t.txt");
        write_table(&fname, "a b", nd::arr2(&[[1.0, -2.5], [0.0, 3.0]]).view()).unwrap();

        let txt = fs::read_to_string(&fname).unwrap();
        let lines = txt.lines().collect_vec();
        assert_eq!(lines[0], "# a b");
        let row: Vec<f64> = lines[1].split_whitespace().map(|x| x.parse().unwrap()).collect();
        assert_eq!(row, vec![1.0, -2.5]);
        assert_eq!(lines.len(), 3);
    }
}
