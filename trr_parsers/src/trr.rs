//! Reader of GROMACS `.trr` full-precision trajectories.
//!
//! Every frame is an XDR (big-endian) record:
//!
//! ```text
//!  i32       magic number (1993)
//!  i32, i32  version string lengths (13, 12)
//!  [u8]      "GMX_trn_file", padded to 4 bytes
//!  i32 x 13  ir, e, box, vir, pres, top, sym, x, v, f sizes in bytes, natoms, step, nre
//!  real x 2  time, lambda
//!  payload   box (3x3), virial, pressure, positions, velocities, forces
//! ```
//!
//! where `real` is `f32` or `f64` depending on how the file was written. The whole file is
//! loaded into memory, gzipped files (`*.gz`) are decompressed on the fly. Writing produces the
//! same layout with empty ir/e/vir/pres/top/sym records.
use std::fs;
use std::io::{
    Cursor,
    Read,
    Seek,
    SeekFrom,
    Write,
};
use std::path::Path;

use byteorder::{
    BigEndian,
    ReadBytesExt,
    WriteBytesExt,
};
use flate2::{
    read::GzDecoder,
    write::GzEncoder,
    Compression,
};
use itertools::Itertools;
use shared::{
    ndarray as nd,
    bail,
    ensure,
    warn,
    Context,
    Mat33,
    Result,
};

const TRR_MAGIC: i32 = 1993;
const TRR_VERSION: &[u8] = b"GMX_trn_file";


#[derive(Clone, Debug, PartialEq)]
pub struct TrrHeader {
    pub ir_size:   usize,
    pub e_size:    usize,
    pub box_size:  usize,
    pub vir_size:  usize,
    pub pres_size: usize,
    pub top_size:  usize,
    pub sym_size:  usize,
    pub x_size:    usize,
    pub v_size:    usize,
    pub f_size:    usize,
    pub natoms:    usize,
    pub step:      i64,
    pub nre:       i32,
    pub time:      f64,
    pub lambda:    f64,
    pub double:    bool,
}


impl TrrHeader {
    fn parse(cur: &mut Cursor<&[u8]>) -> Result<Self> {
        let magic = cur.read_i32::<BigEndian>()?;
        ensure!(magic == TRR_MAGIC, "Invalid magic number {} for TRR frame, expected {}.", magic, TRR_MAGIC);

        let _slen = cur.read_i32::<BigEndian>()?;
        let nchar = cur.read_i32::<BigEndian>()?;
        ensure!(nchar >= 0, "Invalid version string length {} in TRR header.", nchar);
        let padded = (nchar as i64 + 3) / 4 * 4;
        cur.seek(SeekFrom::Current(padded))?;

        let mut ints = [0i32; 13];
        cur.read_i32_into::<BigEndian>(&mut ints)?;

        let sizes = ints[.. 11].iter()
            .map(|&x| {
                ensure!(x >= 0, "Negative record size {} in TRR header.", x);
                Ok(x as usize)
            })
            .collect::<Result<Vec<usize>>>()?;

        let natoms = sizes[10];
        let block  = sizes[7].max(sizes[8]).max(sizes[9]);
        let double = if natoms > 0 && block > 0 {
            block / natoms / 3 == 8
        } else if sizes[2] > 0 {
            sizes[2] / 9 == 8
        } else {
            false
        };

        let (time, lambda) = if double {
            (cur.read_f64::<BigEndian>()?, cur.read_f64::<BigEndian>()?)
        } else {
            (cur.read_f32::<BigEndian>()? as f64, cur.read_f32::<BigEndian>()? as f64)
        };

        Ok(Self {
            ir_size:   sizes[0],
            e_size:    sizes[1],
            box_size:  sizes[2],
            vir_size:  sizes[3],
            pres_size: sizes[4],
            top_size:  sizes[5],
            sym_size:  sizes[6],
            x_size:    sizes[7],
            v_size:    sizes[8],
            f_size:    sizes[9],
            natoms,
            step:      ints[11] as i64,
            nre:       ints[12],
            time,
            lambda,
            double,
        })
    }


    pub fn real_size(&self) -> usize {
        if self.double { 8 } else { 4 }
    }


    /// Size of the payload following the header, in bytes.
    pub fn body_size(&self) -> usize {
        self.ir_size + self.e_size + self.box_size + self.vir_size + self.pres_size
            + self.top_size + self.sym_size + self.x_size + self.v_size + self.f_size
    }
}


/// Borrowed content of one frame to be written, blocks are `[natoms, 3]`.
#[derive(Clone, Debug, Default)]
pub struct TrrFrameView<'a> {
    pub step:       i64,
    pub time:       f64,
    pub lambda:     f64,
    pub cell:       Option<nd::ArrayView2<'a, f64>>,
    pub positions:  Option<nd::ArrayView2<'a, f64>>,
    pub velocities: Option<nd::ArrayView2<'a, f64>>,
    pub forces:     Option<nd::ArrayView2<'a, f64>>,
}


fn write_real<W: Write>(w: &mut W, x: f64, double: bool) -> Result<()> {
    if double {
        w.write_f64::<BigEndian>(x)?;
    } else {
        w.write_f32::<BigEndian>(x as f32)?;
    }
    Ok(())
}


/// Append one frame in `.trr` layout to `w`.
pub fn write_frame<W: Write>(w: &mut W, frame: &TrrFrameView, double: bool) -> Result<()> {
    let blocks = [frame.positions.as_ref(), frame.velocities.as_ref(), frame.forces.as_ref()];
    let natoms = blocks.iter().flatten().map(|b| b.nrows()).next().unwrap_or(0);

    for b in blocks.iter().flatten() {
        ensure!(b.dim() == (natoms, 3), "Inconsistent block shape {:?} in TRR frame, expected ({}, 3).", b.dim(), natoms);
    }
    if let Some(c) = frame.cell.as_ref() {
        ensure!(c.dim() == (3, 3), "Invalid box shape {:?} in TRR frame.", c.dim());
    }
    let step = i32::try_from(frame.step)
        .with_context(|| format!("Step {} does not fit into a TRR header.", frame.step))?;

    let real  = if double { 8 } else { 4 };
    let block = natoms * 3 * real;
    let size_of = |present: bool, n: usize| if present { n } else { 0 };

    w.write_i32::<BigEndian>(TRR_MAGIC)?;
    w.write_i32::<BigEndian>(TRR_VERSION.len() as i32 + 1)?;
    w.write_i32::<BigEndian>(TRR_VERSION.len() as i32)?;
    w.write_all(TRR_VERSION)?;

    let sizes = [
        0, 0,
        size_of(frame.cell.is_some(), 9 * real),
        0, 0, 0, 0,
        size_of(frame.positions.is_some(), block),
        size_of(frame.velocities.is_some(), block),
        size_of(frame.forces.is_some(), block),
        natoms,
    ];
    for s in sizes {
        let s = i32::try_from(s).context("TRR record too large.")?;
        w.write_i32::<BigEndian>(s)?;
    }
    w.write_i32::<BigEndian>(step)?;
    w.write_i32::<BigEndian>(0)?;
    write_real(w, frame.time, double)?;
    write_real(w, frame.lambda, double)?;

    for b in frame.cell.iter().chain(blocks.into_iter().flatten()) {
        for &x in b.iter() {
            write_real(w, x, double)?;
        }
    }

    Ok(())
}


struct TrrFrame {
    header:     TrrHeader,
    cell:       Option<Mat33<f64>>,
    positions:  Option<nd::Array2<f64>>,
    velocities: Option<nd::Array2<f64>>,
    forces:     Option<nd::Array2<f64>>,
}


/// A whole `.trr` trajectory held in memory.
///
/// Blocks are `[nframes, natoms, 3]` arrays and boxes are `[nframes, 3, 3]` with lattice
/// vectors as rows. A block is `None` unless every frame carries it.
#[derive(Clone, Debug)]
pub struct Trr {
    pub natoms:     usize,
    pub nframes:    usize,
    pub double:     bool,
    pub steps:      Vec<i64>,
    pub times:      Vec<f64>,
    pub lambdas:    Vec<f64>,
    pub boxes:      Option<nd::Array3<f64>>,
    pub positions:  Option<nd::Array3<f64>>,
    pub velocities: Option<nd::Array3<f64>>,
    pub forces:     Option<nd::Array3<f64>>,
}


impl Trr {
    pub fn from_file<P>(fname: P) -> Result<Self>
    where P: AsRef<Path> {
        let fname = fname.as_ref();
        let raw = fs::read(fname)
            .with_context(|| format!("Failed to read TRR file {:?}.", fname))?;

        let raw = if fname.extension().map_or(false, |ext| ext == "gz") {
            let mut buf = vec![];
            GzDecoder::new(raw.as_slice()).read_to_end(&mut buf)
                .with_context(|| format!("Failed to decompress {:?}.", fname))?;
            buf
        } else {
            raw
        };

        Self::from_bytes(&raw)
            .with_context(|| format!("Failed to parse {:?} as TRR trajectory.", fname))
    }


    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        let len = raw.len() as u64;
        let mut cur = Cursor::new(raw);
        let mut frames: Vec<TrrFrame> = vec![];

        while cur.position() < len {
            let iframe = frames.len();
            let frame = Self::read_frame(&mut cur)
                .with_context(|| format!("Broken TRR frame #{}.", iframe))?;
            frames.push(frame);
        }

        ensure!(!frames.is_empty(), "No frame found in TRR data.");
        ensure!(frames.iter().map(|f| f.header.natoms).all_equal(),
            "Number of atoms changes across TRR frames.");

        let natoms  = frames[0].header.natoms;
        let nframes = frames.len();
        let double  = frames[0].header.double;

        let steps   = frames.iter().map(|f| f.header.step).collect_vec();
        let times   = frames.iter().map(|f| f.header.time).collect_vec();
        let lambdas = frames.iter().map(|f| f.header.lambda).collect_vec();

        let boxes = if frames.iter().all(|f| f.cell.is_some()) {
            let flat = frames.iter()
                .flat_map(|f| f.cell.iter().flatten().flatten().cloned().collect_vec())
                .collect_vec();
            Some(nd::Array3::from_shape_vec((nframes, 3, 3), flat)?)
        } else {
            None
        };

        let positions  = Self::stack_block(&frames, "positions",  |f| f.positions.as_ref())?;
        let velocities = Self::stack_block(&frames, "velocities", |f| f.velocities.as_ref())?;
        let forces     = Self::stack_block(&frames, "forces",     |f| f.forces.as_ref())?;

        Ok(Self {
            natoms,
            nframes,
            double,
            steps,
            times,
            lambdas,
            boxes,
            positions,
            velocities,
            forces,
        })
    }


    /// Trajectory from in-memory blocks (`[nframes, natoms, 3]`, boxes `[nframes, 3, 3]`).
    /// Steps count from 0, times equal steps.
    pub fn from_blocks(boxes: Option<nd::Array3<f64>>, positions: Option<nd::Array3<f64>>,
                       forces: Option<nd::Array3<f64>>, double: bool) -> Result<Self> {
        let (nframes, natoms) = match positions.as_ref().or(forces.as_ref()) {
            Some(b) => (b.dim().0, b.dim().1),
            None    => bail!("At least one of positions and forces is required for a TRR trajectory."),
        };

        for b in positions.iter().chain(forces.iter()) {
            ensure!(b.dim() == (nframes, natoms, 3), "Block shape {:?} differs from ({}, {}, 3).", b.dim(), nframes, natoms);
        }
        if let Some(b) = boxes.as_ref() {
            ensure!(b.dim() == (nframes, 3, 3), "Box shape {:?} differs from ({}, 3, 3).", b.dim(), nframes);
        }

        let steps = (0 .. nframes as i64).collect_vec();
        Ok(Self {
            natoms,
            nframes,
            double,
            times: steps.iter().map(|&s| s as f64).collect(),
            lambdas: vec![0.0; nframes],
            steps,
            boxes,
            positions,
            velocities: None,
            forces,
        })
    }


    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = vec![];
        fn frame_of<'a>(block: &'a Option<nd::Array3<f64>>, i: usize) -> Option<nd::ArrayView2<'a, f64>> {
            block.as_ref().map(|b| b.index_axis(nd::Axis(0), i))
        }

        for i in 0 .. self.nframes {
            let frame = TrrFrameView {
                step:       self.steps[i],
                time:       self.times[i],
                lambda:     self.lambdas[i],
                cell:       frame_of(&self.boxes, i),
                positions:  frame_of(&self.positions, i),
                velocities: frame_of(&self.velocities, i),
                forces:     frame_of(&self.forces, i),
            };
            write_frame(&mut buf, &frame, self.double)?;
        }

        Ok(buf)
    }


    /// Write the trajectory, gzipped when `fname` ends with `.gz`.
    pub fn to_file<P>(&self, fname: P) -> Result<()>
    where P: AsRef<Path> {
        let fname = fname.as_ref();
        let buf = self.to_bytes()?;

        if fname.extension().map_or(false, |ext| ext == "gz") {
            let mut enc = GzEncoder::new(fs::File::create(fname)?, Compression::default());
            enc.write_all(&buf)?;
            enc.finish()?;
        } else {
            fs::write(fname, &buf)
                .with_context(|| format!("Failed to write TRR file {:?}.", fname))?;
        }
        Ok(())
    }


    /// Keep only the atoms in `indices` (0-based, in the given order).
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        if let Some(&i) = indices.iter().find(|&&i| i >= self.natoms) {
            bail!("Atom index {} out of range, the trajectory contains {} atoms.", i, self.natoms);
        }

        let pick = |block: &Option<nd::Array3<f64>>| {
            block.as_ref().map(|b| b.select(nd::Axis(1), indices))
        };

        Ok(Self {
            natoms:     indices.len(),
            nframes:    self.nframes,
            double:     self.double,
            steps:      self.steps.clone(),
            times:      self.times.clone(),
            lambdas:    self.lambdas.clone(),
            boxes:      self.boxes.clone(),
            positions:  pick(&self.positions),
            velocities: pick(&self.velocities),
            forces:     pick(&self.forces),
        })
    }


    fn read_frame(cur: &mut Cursor<&[u8]>) -> Result<TrrFrame> {
        let header = TrrHeader::parse(cur)?;

        ensure!(header.ir_size == 0 && header.e_size == 0 && header.top_size == 0 && header.sym_size == 0,
            "TRR frames with input record, energy, topology or symmetry blocks are not supported.");

        let remaining = cur.get_ref().len() as u64 - cur.position();
        ensure!(header.body_size() as u64 <= remaining,
            "Truncated TRR frame: {} bytes expected but only {} left.", header.body_size(), remaining);

        let real = header.real_size();

        let cell = if header.box_size > 0 {
            ensure!(header.box_size == 9 * real, "Invalid box size {} in TRR header.", header.box_size);
            let mut cell = [[0.0f64; 3]; 3];
            for row in cell.iter_mut() {
                for x in row.iter_mut() {
                    *x = Self::read_real(cur, header.double)?;
                }
            }
            Some(cell)
        } else {
            None
        };

        cur.seek(SeekFrom::Current((header.vir_size + header.pres_size) as i64))?;

        let positions  = Self::read_block(cur, &header, header.x_size)?;
        let velocities = Self::read_block(cur, &header, header.v_size)?;
        let forces     = Self::read_block(cur, &header, header.f_size)?;

        Ok(TrrFrame {
            header,
            cell,
            positions,
            velocities,
            forces,
        })
    }


    fn read_block(cur: &mut Cursor<&[u8]>, header: &TrrHeader, size: usize) -> Result<Option<nd::Array2<f64>>> {
        if size == 0 {
            return Ok(None);
        }

        let n = header.natoms * 3;
        ensure!(size == n * header.real_size(),
            "Block size {} inconsistent with {} atoms.", size, header.natoms);

        let dat = (0 .. n)
            .map(|_| Self::read_real(cur, header.double))
            .collect::<Result<Vec<f64>>>()?;

        Ok(Some(nd::Array2::from_shape_vec((header.natoms, 3), dat)?))
    }


    fn read_real(cur: &mut Cursor<&[u8]>, double: bool) -> Result<f64> {
        Ok(if double {
            cur.read_f64::<BigEndian>()?
        } else {
            cur.read_f32::<BigEndian>()? as f64
        })
    }


    fn stack_block<F>(frames: &[TrrFrame], name: &str, get: F) -> Result<Option<nd::Array3<f64>>>
    where F: Fn(&TrrFrame) -> Option<&nd::Array2<f64>> {
        let nhave = frames.iter().filter(|f| get(f).is_some()).count();

        if nhave == 0 {
            return Ok(None);
        }

        if nhave != frames.len() {
            warn!("Only {} of {} TRR frames contain {}, the block is dropped.", nhave, frames.len(), name);
            return Ok(None);
        }

        let views = frames.iter()
            .filter_map(|f| get(f).map(|b| b.view()))
            .collect_vec();
        Ok(Some(nd::stack(nd::Axis(0), &views)?))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    fn frame(buf: &mut Vec<u8>, step: i64, cell: Option<Mat33<f64>>,
             x: Option<&[[f64; 3]]>, f: Option<&[[f64; 3]]>, double: bool) {
        let cell = cell.map(|c| nd::arr2(&c));
        let x = x.map(|b| nd::arr2(b));
        let f = f.map(|b| nd::arr2(b));
        let view = TrrFrameView {
            step,
            time: step as f64 * 2.0,
            cell: cell.as_ref().map(|c| c.view()),
            positions: x.as_ref().map(|b| b.view()),
            forces: f.as_ref().map(|b| b.view()),
            ..Default::default()
        };
        write_frame(buf, &view, double).unwrap();
    }

    fn cubic(a: f64) -> Mat33<f64> {
        [[a, 0.0, 0.0], [0.0, a, 0.0], [0.0, 0.0, a]]
    }

    #[test]
    fn test_single_precision() {
        let mut buf = vec![];
        let x0 = [[0.5, 1.0, 1.5], [2.0, 2.5, 3.0]];
        let x1 = [[0.75, 1.0, 1.5], [2.0, 2.25, 3.0]];
        let f0 = [[1.0, 0.0, 0.0], [0.0, -1.0, 0.0]];
        frame(&mut buf, 0, Some(cubic(3.0)), Some(&x0[..]), Some(&f0[..]), false);
        frame(&mut buf, 10, Some(cubic(3.5)), Some(&x1[..]), Some(&f0[..]), false);

        let trr = Trr::from_bytes(&buf).unwrap();
        assert_eq!(trr.natoms, 2);
        assert_eq!(trr.nframes, 2);
        assert!(!trr.double);
        assert_eq!(trr.steps, vec![0, 10]);
        assert_eq!(trr.times, vec![0.0, 20.0]);

        let pos = trr.positions.as_ref().unwrap();
        assert_eq!(pos.shape(), &[2, 2, 3]);
        assert_eq!(pos[[1, 0, 0]], 0.75);
        assert_eq!(pos[[1, 1, 1]], 2.25);

        let boxes = trr.boxes.as_ref().unwrap();
        assert_eq!(boxes[[1, 2, 2]], 3.5);
        assert_eq!(boxes[[1, 0, 1]], 0.0);

        assert_eq!(trr.forces.as_ref().unwrap()[[0, 1, 1]], -1.0);
        assert!(trr.velocities.is_none());
    }

    #[test]
    fn test_double_precision_and_select() {
        let mut buf = vec![];
        let x = [[0.1, 0.2, 0.3], [0.4, 0.5, 0.6], [0.7, 0.8, 0.9]];
        frame(&mut buf, 0, Some(cubic(2.0)), Some(&x[..]), None, true);

        let trr = Trr::from_bytes(&buf).unwrap();
        assert!(trr.double);
        assert_eq!(trr.positions.as_ref().unwrap()[[0, 2, 1]], 0.8);
        assert!(trr.forces.is_none());

        let sel = trr.select(&[2, 0]).unwrap();
        assert_eq!(sel.natoms, 2);
        let pos = sel.positions.unwrap();
        assert_eq!(pos[[0, 0, 0]], 0.7);
        assert_eq!(pos[[0, 1, 0]], 0.1);

        assert!(trr.select(&[3]).is_err());
    }

    #[test]
    fn test_partial_block_dropped() {
        let mut buf = vec![];
        let x = [[0.0, 0.0, 0.0]];
        frame(&mut buf, 0, None, Some(&x[..]), Some(&x[..]), false);
        frame(&mut buf, 1, None, Some(&x[..]), None, false);

        let trr = Trr::from_bytes(&buf).unwrap();
        assert!(trr.positions.is_some());
        assert!(trr.forces.is_none());
        assert!(trr.boxes.is_none());
    }

    #[test]
    fn test_broken_input() {
        let mut buf = vec![];
        let x = [[0.0, 0.0, 0.0]];
        frame(&mut buf, 0, Some(cubic(1.0)), Some(&x[..]), None, false);

        let truncated = &buf[.. buf.len() - 2];
        assert!(Trr::from_bytes(truncated).is_err());

        let mut bad_magic = buf.clone();
        bad_magic[3] = 0;
        assert!(Trr::from_bytes(&bad_magic).is_err());

        assert!(Trr::from_bytes(&[]).is_err());
    }

    #[test]
    fn test_from_gzipped_file() {
        let mut buf = vec![];
        let x = [[1.0, 2.0, 3.0]];
        frame(&mut buf, 5, Some(cubic(4.0)), Some(&x[..]), None, false);

        let dir = TempDir::new("trr_parsers").unwrap();
        let fname = dir.path().join("traj.trr.gz");
        let mut enc = GzEncoder::new(fs::File::create(&fname).unwrap(), Compression::default());
        enc.write_all(&buf).unwrap();
        enc.finish().unwrap();

        let trr = Trr::from_file(&fname).unwrap();
        assert_eq!(trr.steps, vec![5]);
        assert_eq!(trr.positions.unwrap()[[0, 0, 2]], 3.0);

        let plain = dir.path().join("traj.trr");
        fs::write(&plain, &buf).unwrap();
        assert_eq!(Trr::from_file(&plain).unwrap().natoms, 1);
    }

    #[test]
    fn test_write_trajectory() {
        let pos = nd::Array3::from_shape_fn((3, 2, 3), |(t, i, k)| (t * 6 + i * 3 + k) as f64 * 0.25);
        let frc = pos.mapv(|x| -x);
        let boxes = nd::stack(nd::Axis(0), &[nd::arr2(&cubic(5.0)).view(); 3]).unwrap();

        let trr = Trr::from_blocks(Some(boxes), Some(pos.clone()), Some(frc), true).unwrap();
        assert_eq!(trr.steps, vec![0, 1, 2]);

        let dir = TempDir::new("trr_parsers").unwrap();
        let fname = dir.path().join("written.trr.gz");
        trr.to_file(&fname).unwrap();

        let back = Trr::from_file(&fname).unwrap();
        assert!(back.double);
        assert_eq!(back.nframes, 3);
        assert_eq!(back.positions.as_ref().unwrap(), &pos);
        assert_eq!(back.forces.unwrap()[[2, 1, 2]], -pos[[2, 1, 2]]);
        assert_eq!(back.boxes.unwrap()[[1, 1, 1]], 5.0);

        assert!(Trr::from_blocks(None, None, None, false).is_err());
        let short = nd::Array3::<f64>::zeros((2, 2, 3));
        assert!(Trr::from_blocks(None, Some(pos), Some(short), false).is_err());
    }
}
