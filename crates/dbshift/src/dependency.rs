//! Table ordering by foreign key dependencies.
//!
//! Tables are sorted so every referenced table comes before the tables that
//! reference it (Kahn's algorithm). Ready tables are taken in input order,
//! so the result is deterministic for a given input.

use std::collections::{HashMap, VecDeque};

use crate::core::schema::TableDefinition;
use crate::error::{ConvertError, Result};

/// Sort tables so referenced tables precede their dependents.
///
/// Foreign keys to tables outside `tables` are ignored. A table referencing
/// itself is part of a cycle. Fails with [`ConvertError::CyclicDependency`]
/// naming every table that could not be placed.
pub fn resolve(tables: &[TableDefinition]) -> Result<Vec<TableDefinition>> {
    let order = resolve_indices(tables)?;
    Ok(order.into_iter().map(|i| tables[i].clone()).collect())
}

/// Same as [`resolve`], returning positions into `tables`.
pub fn resolve_indices(tables: &[TableDefinition]) -> Result<Vec<usize>> {
    let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(tables.len() * 2);
    for (i, table) in tables.iter().enumerate() {
        by_name.entry(table.name.as_str()).or_insert(i);
    }
    let full_names: Vec<String> = tables.iter().map(|t| t.full_name()).collect();
    for (i, name) in full_names.iter().enumerate() {
        by_name.entry(name.as_str()).or_insert(i);
    }

    // dependents[p] lists the tables holding a foreign key to p
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); tables.len()];
    let mut in_degree: Vec<usize> = vec![0; tables.len()];

    for (child, table) in tables.iter().enumerate() {
        for fk in &table.foreign_keys {
            let Some(&parent) = by_name.get(fk.referenced_table.as_str()) else {
                continue;
            };
            dependents[parent].push(child);
            in_degree[child] += 1;
        }
    }

    let mut queue: VecDeque<usize> = (0..tables.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut sorted = Vec::with_capacity(tables.len());

    while let Some(current) = queue.pop_front() {
        sorted.push(current);
        for &dependent in &dependents[current] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if sorted.len() != tables.len() {
        let unresolved = (0..tables.len())
            .filter(|&i| in_degree[i] > 0)
            .map(|i| full_names[i].clone())
            .collect();
        return Err(ConvertError::CyclicDependency { tables: unresolved });
    }

    Ok(sorted)
}
