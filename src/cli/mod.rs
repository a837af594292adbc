pub mod check;
pub mod topo;
