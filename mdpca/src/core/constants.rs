pub const EPS:          f64 = 1e-10;
pub const NM_TO_ANG:    f64 = 10.0;             // GROMACS lengths are stored in nm
pub const BOX_DET_TOL:  f64 = 1e-12;            // relative to a*b*c
pub const COLLINEAR_TOL: f64 = 1e-8;            // relative to the largest singular value
