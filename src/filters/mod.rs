pub mod ekf_7d;
pub mod rts_smoother;
