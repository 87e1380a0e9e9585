pub mod colormaps;
pub mod info;
pub mod montage;
pub mod run;
