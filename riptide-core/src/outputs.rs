pub mod whep;
