//! CSV persistence for point clouds.
//!
//! The header names the feature labels (`x,y[,z]`) followed by descriptor
//! columns: a 1-row descriptor keeps its bare name, `normals` uses axis
//! suffixes, anything else gets `_0..` suffixes. Loading rebuilds the
//! descriptor schema from the header, so save-then-load preserves it.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use nalgebra::DMatrix;

use crate::core::types::{Descriptor, PointCloud, NORMALS};
use crate::error::{MapperError, Result};

const AXES: [&str; 3] = ["x", "y", "z"];

/// Write a cloud to `path` as CSV.
pub fn save<P: AsRef<Path>>(cloud: &PointCloud, path: P) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let dim = cloud.euclidean_dim();
    let mut header: Vec<String> = AXES[..dim].iter().map(|a| a.to_string()).collect();
    for d in cloud.descriptors() {
        let rows = d.values.nrows();
        if rows == 1 {
            header.push(d.name.clone());
        } else if d.name == NORMALS && rows <= 3 {
            for axis in &AXES[..rows] {
                header.push(format!("{}_{}", d.name, axis));
            }
        } else {
            for r in 0..rows {
                header.push(format!("{}_{}", d.name, r));
            }
        }
    }
    writeln!(writer, "{}", header.join(","))?;

    for i in 0..cloud.nb_points() {
        let mut fields = Vec::with_capacity(header.len());
        let p = cloud.point(i);
        for r in 0..dim {
            fields.push(p[r].to_string());
        }
        for d in cloud.descriptors() {
            for r in 0..d.values.nrows() {
                fields.push(d.values[(r, i)].to_string());
            }
        }
        writeln!(writer, "{}", fields.join(","))?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a cloud from a CSV file written by [`save`].
pub fn load<P: AsRef<Path>>(path: P) -> Result<PointCloud> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        MapperError::Config(format!("cannot open map file {}: {}", path.display(), e))
    })?;
    let mut lines = BufReader::new(file).lines();

    let header_line = lines
        .next()
        .ok_or_else(|| MapperError::Map(format!("empty map file {}", path.display())))??;
    let columns: Vec<&str> = header_line.split(',').map(str::trim).collect();

    let dim = columns
        .iter()
        .take_while(|c| AXES.contains(&c.to_lowercase().as_str()))
        .count();
    if !(2..=3).contains(&dim) {
        return Err(MapperError::Map(format!(
            "map file {} must start with x,y[,z] columns",
            path.display()
        )));
    }

    // Group the remaining columns into descriptors by base name.
    let mut groups: Vec<(String, usize)> = Vec::new();
    for column in &columns[dim..] {
        let base = descriptor_base(column);
        match groups.last_mut() {
            Some((name, rows)) if *name == base => *rows += 1,
            _ => groups.push((base, 1)),
        }
    }

    let mut rows: Vec<Vec<f32>> = Vec::new();
    for (line_no, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != columns.len() {
            return Err(MapperError::Map(format!(
                "map file {} line {}: expected {} fields, found {}",
                path.display(),
                line_no + 2,
                columns.len(),
                fields.len()
            )));
        }
        let mut values = Vec::with_capacity(fields.len());
        for field in fields {
            values.push(field.parse::<f32>().map_err(|_| {
                MapperError::Map(format!(
                    "map file {} line {}: invalid number '{}'",
                    path.display(),
                    line_no + 2,
                    field
                ))
            })?);
        }
        rows.push(values);
    }

    let n = rows.len();
    let mut features = DMatrix::zeros(dim + 1, n);
    for (i, row) in rows.iter().enumerate() {
        for r in 0..dim {
            features[(r, i)] = row[r];
        }
        features[(dim, i)] = 1.0;
    }

    let mut descriptors = Vec::new();
    let mut offset = dim;
    for (name, height) in groups {
        let mut values = DMatrix::zeros(height, n);
        for (i, row) in rows.iter().enumerate() {
            for r in 0..height {
                values[(r, i)] = row[offset + r];
            }
        }
        descriptors.push(Descriptor { name, values });
        offset += height;
    }

    PointCloud::new(features, descriptors)
}

/// Strip an axis or index suffix from a descriptor column name.
fn descriptor_base(column: &str) -> String {
    if let Some((base, suffix)) = column.rsplit_once('_') {
        let axis = AXES.contains(&suffix);
        let index = !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit());
        if axis || index {
            return base.to_string();
        }
    }
    column.to_string()
}
