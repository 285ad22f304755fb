//! Human-readable Stock-Flow consistent model format.
//!
//! Block-structured:
//!
//! ```text
//! @init
//! timestep 0.05
//! integration backward_euler
//! @end
//!
//! @parameters params
//! alpha1 = 0.6
//! @end
//!
//! @equations model
//! Y = C + G
//! H ~ YD - C
//! H(0) = 0
//! @end
//!
//! @matrix bank
//! | flows   | Cash:A:10 | Deposits:L:10 |
//! |---------|-----------|---------------|
//! | wages   | W         | -W            |
//! @end_matrix
//!
//! @hints
//! Y: national income
//! @end
//!
//! @scope Y
//!
//! @circuit
//! r 0 0 64 0 0 1000
//! @end
//! ```
//!
//! The format is auto-detected by the presence of any `@` block keyword.

use volta_elements::godley::{GodleyRow, GodleyTable, Stock, StockClass};
use volta_elements::table::{EquationTable, RowFlavor, TableRow};
use volta_elements::{Base, Element};

use crate::circuit::parse_element_line;
use crate::error::{ParseError, Result};
use crate::types::{ParsedCircuit, ScopeKind, ScopeRequest, SimOptions};

const BLOCK_KEYWORDS: [&str; 7] = [
    "@init",
    "@matrix",
    "@equations",
    "@parameters",
    "@hints",
    "@scope",
    "@circuit",
];

/// True if the text uses any SFC block keyword.
pub fn looks_like_sfc(text: &str) -> bool {
    text.lines().any(|line| {
        let t = line.trim_start();
        BLOCK_KEYWORDS.iter().any(|k| t.starts_with(k))
    })
}

/// Parse an SFC model file.
pub fn parse_sfc(text: &str) -> Result<ParsedCircuit> {
    let mut parsed = ParsedCircuit::empty();
    // Economic models run in seconds-scale time, not microseconds.
    parsed.options.dt = 0.05;
    parsed.options.sim_speed = 100;

    let lines: Vec<&str> = text.lines().collect();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i].trim();
        i += 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (keyword, rest) = match line.split_once(char::is_whitespace) {
            Some((k, r)) => (k, r.trim()),
            None => (line, ""),
        };

        match keyword {
            "@init" => {
                let block = collect_block(&lines, &mut i, "@end", "init")?;
                parse_init(&block, &mut parsed.options)?;
            }
            "@parameters" => {
                let block = collect_block(&lines, &mut i, "@end", "parameters")?;
                parse_parameters(&block, &mut parsed)?;
            }
            "@equations" => {
                let block = collect_block(&lines, &mut i, "@end", "equations")?;
                let table = parse_equations(rest, &block)?;
                parsed.elements.push(Box::new(table));
            }
            "@matrix" => {
                let block = collect_block(&lines, &mut i, "@end_matrix", "matrix")?;
                let table = parse_matrix(rest, &block)?;
                parsed.elements.push(Box::new(table));
            }
            "@hints" => {
                let block = collect_block(&lines, &mut i, "@end", "hints")?;
                for (no, text) in block {
                    if let Some((name, hint)) = text.split_once(':') {
                        parsed
                            .hints
                            .push((name.trim().to_string(), hint.trim().to_string()));
                    } else {
                        return Err(ParseError::BadLine {
                            line: no,
                            reason: "hint lines are 'name: text'".into(),
                        });
                    }
                }
            }
            "@scope" => {
                if rest.is_empty() {
                    return Err(ParseError::BadLine {
                        line: i,
                        reason: "@scope needs a variable name".into(),
                    });
                }
                parsed.scopes.push(ScopeRequest {
                    target: rest.to_string(),
                    kind: ScopeKind::Value,
                });
            }
            "@circuit" => {
                let block = collect_block(&lines, &mut i, "@end", "circuit")?;
                for (no, text) in block {
                    if let Some(element) = parse_element_line(&text, no)? {
                        parsed.elements.push(element);
                    }
                }
            }
            other => {
                return Err(ParseError::BadLine {
                    line: i,
                    reason: format!("unexpected '{other}' outside a block"),
                });
            }
        }
    }

    if parsed.elements.is_empty() && parsed.parameters.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(parsed)
}

/// Collect lines until `terminator`, returning (line_no, text) pairs.
fn collect_block(
    lines: &[&str],
    i: &mut usize,
    terminator: &str,
    block: &str,
) -> Result<Vec<(usize, String)>> {
    let start = *i;
    let mut out = Vec::new();
    while *i < lines.len() {
        let line = lines[*i].trim();
        *i += 1;
        if line == terminator || line == "@end" {
            return Ok(out);
        }
        if !line.is_empty() && !line.starts_with('#') {
            out.push((*i, line.to_string()));
        }
    }
    Err(ParseError::UnterminatedBlock {
        block: block.to_string(),
        line: start,
    })
}

fn parse_init(block: &[(usize, String)], options: &mut SimOptions) -> Result<()> {
    for (no, line) in block {
        let Some((key, value)) = line.split_once(char::is_whitespace) else {
            return Err(ParseError::BadLine {
                line: *no,
                reason: "init lines are 'key value'".into(),
            });
        };
        match key {
            "timestep" => {
                options.dt = value.trim().parse().map_err(|_| ParseError::BadNumber {
                    line: *no,
                    text: value.trim().to_string(),
                })?;
            }
            "integration" => match value.trim() {
                "trapezoidal" => options.flags |= SimOptions::FLAG_TRAPEZOIDAL,
                "backward_euler" => options.flags &= !SimOptions::FLAG_TRAPEZOIDAL,
                other => {
                    return Err(ParseError::BadLine {
                        line: *no,
                        reason: format!("unknown integration method '{other}'"),
                    });
                }
            },
            // Display-only settings pass through.
            "units" | "display" => {}
            other => {
                log::warn!("line {no}: ignoring unknown init key '{other}'");
            }
        }
    }
    Ok(())
}

fn parse_parameters(block: &[(usize, String)], parsed: &mut ParsedCircuit) -> Result<()> {
    for (no, line) in block {
        let Some((name, value)) = line.split_once('=') else {
            return Err(ParseError::BadLine {
                line: *no,
                reason: "parameter lines are 'name = value'".into(),
            });
        };
        let value: f64 = value.trim().parse().map_err(|_| ParseError::BadNumber {
            line: *no,
            text: value.trim().to_string(),
        })?;
        parsed.parameters.push((name.trim().to_string(), value));
    }
    Ok(())
}

fn parse_equations(header: &str, block: &[(usize, String)]) -> Result<EquationTable> {
    let mut parts = header.split_whitespace();
    let title = parts.next().unwrap_or("equations").to_string();
    let priority: u8 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(5);

    let mut rows: Vec<TableRow> = Vec::new();
    for (no, line) in block {
        // Initial condition line: name(0) = value
        if let Some((head, value)) = line.split_once('=') {
            let head = head.trim();
            if let Some(name) = head.strip_suffix("(0)") {
                let name = name.trim();
                let value: f64 = value.trim().parse().map_err(|_| ParseError::BadNumber {
                    line: *no,
                    text: value.trim().to_string(),
                })?;
                let row = rows
                    .iter_mut()
                    .find(|r| r.name == name)
                    .ok_or_else(|| ParseError::BadLine {
                        line: *no,
                        reason: format!("initial condition for unknown row '{name}'"),
                    })?;
                row.seed(value);
                continue;
            }
        }

        // Rate rows bind with '~', algebraic rows with '='.
        let (name, flavor, expr) = if let Some((name, expr)) = line.split_once('~') {
            (name, RowFlavor::Rate, expr)
        } else if let Some((name, expr)) = line.split_once('=') {
            (name, RowFlavor::Algebraic, expr)
        } else {
            return Err(ParseError::BadLine {
                line: *no,
                reason: "equation lines are 'name = expr' or 'name ~ expr'".into(),
            });
        };
        let row = TableRow::new(name.trim(), flavor, expr.trim())
            .map_err(|source| ParseError::BadExpression {
                line: *no,
                source,
            })?;
        rows.push(row);
    }

    Ok(EquationTable::new(Base::default(), title, priority, rows))
}

fn parse_matrix(header: &str, block: &[(usize, String)]) -> Result<GodleyTable> {
    let mut parts = header.split_whitespace();
    let title = parts.next().unwrap_or("matrix").to_string();
    let priority: u8 = parts.next().and_then(|p| p.parse().ok()).unwrap_or(5);

    let mut stocks: Vec<Stock> = Vec::new();
    let mut rows: Vec<GodleyRow> = Vec::new();

    for (no, line) in block {
        if !line.starts_with('|') {
            return Err(ParseError::BadLine {
                line: *no,
                reason: "matrix rows are pipe-delimited".into(),
            });
        }
        let cells: Vec<&str> = line
            .trim_matches('|')
            .split('|')
            .map(str::trim)
            .collect();
        // Markdown separator row
        if cells
            .iter()
            .all(|c| c.is_empty() || c.chars().all(|ch| ch == '-' || ch == ':'))
        {
            continue;
        }

        if stocks.is_empty() {
            // Header row: corner label, then Name:Class[:initial]
            for cell in cells.iter().skip(1) {
                let mut bits = cell.split(':');
                let name = bits.next().unwrap_or("").trim().to_string();
                if name.is_empty() {
                    return Err(ParseError::BadLine {
                        line: *no,
                        reason: "stock column needs a name".into(),
                    });
                }
                let class = bits
                    .next()
                    .map(str::trim)
                    .and_then(StockClass::from_code)
                    .unwrap_or(StockClass::Asset);
                let initial: f64 = bits
                    .next()
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(0.0);
                stocks.push(Stock {
                    name,
                    class,
                    initial,
                });
            }
            continue;
        }

        let label = cells.first().copied().unwrap_or("").to_string();
        let mut flow_cells = Vec::with_capacity(stocks.len());
        for ci in 0..stocks.len() {
            let text = cells.get(ci + 1).copied().unwrap_or("");
            flow_cells.push((!text.is_empty()).then(|| text.to_string()));
        }
        rows.push(
            GodleyRow::new(label, flow_cells).map_err(|source| ParseError::BadExpression {
                line: *no,
                source,
            })?,
        );
    }

    Ok(GodleyTable::new(
        Base::default(),
        title,
        priority,
        stocks,
        rows,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_auto;

    const SIM_MODEL: &str = "\
@init
timestep 0.05
@end

@parameters params
alpha1 = 0.6
alpha2 = 0.4
theta = 0.2
G = 20
@end

@equations model
Y = C + G
T = theta * Y
YD = Y - T
C = alpha1*YD + alpha2*H
H ~ YD - C
H(0) = 0
@end

@scope Y
@scope H
";

    #[test]
    fn test_detection() {
        assert!(looks_like_sfc(SIM_MODEL));
        assert!(!looks_like_sfc("$ 10 1e-05 0.05 0 5\nr 0 0 64 0 0 1\n"));
    }

    #[test]
    fn test_parse_sim_model() {
        let parsed = parse_auto(SIM_MODEL).unwrap();
        assert_eq!(parsed.options.dt, 0.05);
        assert_eq!(parsed.parameters.len(), 4);
        assert_eq!(parsed.elements.len(), 1);
        assert_eq!(parsed.scopes.len(), 2);

        let table = parsed.elements[0]
            .as_any()
            .downcast_ref::<EquationTable>()
            .expect("equations block builds a table");
        assert_eq!(table.rows().len(), 5);
        assert_eq!(table.rows()[4].name, "H");
        assert_eq!(table.rows()[4].flavor, RowFlavor::Rate);
    }

    #[test]
    fn test_parse_matrix_block() {
        let text = "\
@matrix bank
| flows | Cash:A:10 | Deposits:L:10 |
|-------|-----------|---------------|
| wages | W         | -W            |
| spend | -C        | C             |
@end_matrix
";
        let parsed = parse_sfc(text).unwrap();
        let godley = parsed.elements[0]
            .as_any()
            .downcast_ref::<GodleyTable>()
            .expect("matrix block builds a godley table");
        assert_eq!(godley.stocks().len(), 2);
        assert_eq!(godley.stocks()[0].name, "Cash");
        assert_eq!(godley.stocks()[0].initial, 10.0);
        assert_eq!(godley.rows().len(), 2);
        assert_eq!(godley.rows()[1].cell_source(0), Some("-C"));
    }

    #[test]
    fn test_circuit_block_passthrough() {
        let text = "\
@circuit
r 0 0 64 0 0 1000
g 64 0 64 16 0
@end
";
        let parsed = parse_sfc(text).unwrap();
        assert_eq!(parsed.elements.len(), 2);
        assert_eq!(parsed.elements[0].dump_code(), "r");
    }

    #[test]
    fn test_unterminated_block_rejected() {
        let text = "@equations model\nY = 1\n";
        assert!(matches!(
            parse_sfc(text),
            Err(ParseError::UnterminatedBlock { .. })
        ));
    }

    #[test]
    fn test_initial_condition_for_unknown_row() {
        let text = "@equations m\nQ(0) = 4\n@end\n";
        assert!(matches!(parse_sfc(text), Err(ParseError::BadLine { .. })));
    }
}
