pub mod codeletion;
pub mod gene_pairs;
pub mod synthetic_lethality;
