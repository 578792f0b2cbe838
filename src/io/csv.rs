/*!
# I/O Utilities for Saving MCMC Data to CSV

This module provides functions to save sampler output to CSV files. Enable
via the `csv` feature.
*/

use nalgebra::{DMatrix, DVector};
use std::error::Error;
use std::fs::File;

use csv::Writer;

/**
Saves one or more chains as a CSV file.

Each chain is the `(samples, log_probs)` pair returned by a sampler's `run`
method: a samples matrix with one row per step and the aligned log-density
vector.

The resulting CSV file will have:
- A header row containing `"chain"`, `"sample"`, one column per dimension
  named `"dim_0"`, `"dim_1"`, etc., and `"log_prob"`.
- One row per recorded step of each chain.

# Arguments

* `chains` - The `(samples, log_probs)` pairs, one per chain.
* `filename` - The file path where the CSV data will be written.

# Returns

Returns `Ok(())` if successful, or an error if any I/O or CSV formatting
issue occurs.

# Examples

```rust
use dram_mcmc::io::csv::save_csv;
use nalgebra::{dmatrix, dvector};

let samples = dmatrix![1.0, 2.0; 1.1, 2.1];
let log_probs = dvector![-0.5, -0.7];

save_csv(&[(samples, log_probs)], "/tmp/output.csv").expect("Expecting saving data to succeed");
```
*/
pub fn save_csv(
    chains: &[(DMatrix<f64>, DVector<f64>)],
    filename: &str,
) -> Result<(), Box<dyn Error>> {
    let mut wtr = Writer::from_writer(File::create(filename)?);
    let n_dims = chains.first().map_or(0, |(samples, _)| samples.ncols());

    let mut header: Vec<String> = vec!["chain".to_string(), "sample".to_string()];
    header.extend((0..n_dims).map(|i| format!("dim_{}", i)));
    header.push("log_prob".to_string());
    wtr.write_record(&header)?;

    for (chain_idx, (samples, log_probs)) in chains.iter().enumerate() {
        for sample_idx in 0..samples.nrows() {
            let mut row = vec![chain_idx.to_string(), sample_idx.to_string()];
            row.extend(samples.row(sample_idx).iter().map(|v| v.to_string()));
            row.push(log_probs[sample_idx].to_string());
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}
