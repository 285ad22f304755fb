//! Godley transaction-matrix table.
//!
//! Columns are stocks (classed asset, liability or equity), rows are
//! transactions whose cells hold flow expressions. Each stock
//! integrates its column sum; every row must satisfy the accounting
//! identity `assets - liabilities - equity = 0`.
//!
//! The table never participates in MNA: stocks live purely in the
//! computed-value registry, which is what lets several tables share an
//! economy through master-priority names.

use std::any::Any;

use volta_core::{ComputedValues, ElementId, Result};
use volta_expr::{Compiled, ExprState, ParseError, eval, parse};

use crate::context::SimContext;
use crate::element::{Base, Element};

/// Accounting class of a stock column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockClass {
    Asset,
    Liability,
    Equity,
}

impl StockClass {
    /// Sign of this column in the accounting identity.
    fn identity_sign(&self) -> f64 {
        match self {
            StockClass::Asset => 1.0,
            StockClass::Liability | StockClass::Equity => -1.0,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            StockClass::Asset => "A",
            StockClass::Liability => "L",
            StockClass::Equity => "E",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "A" => Some(StockClass::Asset),
            "L" => Some(StockClass::Liability),
            "E" => Some(StockClass::Equity),
            _ => None,
        }
    }
}

/// One stock column.
#[derive(Debug, Clone)]
pub struct Stock {
    pub name: String,
    pub class: StockClass,
    pub initial: f64,
}

/// One flow cell.
#[derive(Debug)]
struct Cell {
    source: String,
    compiled: Compiled,
    state: ExprState,
}

/// One transaction row.
#[derive(Debug)]
pub struct GodleyRow {
    pub label: String,
    cells: Vec<Option<Cell>>,
}

impl GodleyRow {
    pub fn new(
        label: impl Into<String>,
        sources: Vec<Option<String>>,
    ) -> std::result::Result<Self, ParseError> {
        let mut cells = Vec::with_capacity(sources.len());
        for source in sources {
            cells.push(match source {
                Some(text) if !text.trim().is_empty() => {
                    let compiled = parse(&text)?;
                    let state = ExprState::new(compiled.num_slots);
                    Some(Cell {
                        source: text,
                        compiled,
                        state,
                    })
                }
                _ => None,
            });
        }
        Ok(Self {
            label: label.into(),
            cells,
        })
    }

    pub fn cell_source(&self, col: usize) -> Option<&str> {
        self.cells
            .get(col)
            .and_then(|c| c.as_ref())
            .map(|c| c.source.as_str())
    }
}

#[derive(Debug)]
pub struct GodleyTable {
    base: Base,
    pub title: String,
    pub priority: u8,
    stocks: Vec<Stock>,
    rows: Vec<GodleyRow>,
    /// Committed stock levels.
    values: Vec<f64>,
    pending: Vec<f64>,
    last_flows: Vec<f64>,
    /// Identity residual per row from the last evaluation.
    residuals: Vec<f64>,
    identity_warned: bool,
    id: Option<ElementId>,
}

impl GodleyTable {
    pub fn new(
        base: Base,
        title: impl Into<String>,
        priority: u8,
        stocks: Vec<Stock>,
        rows: Vec<GodleyRow>,
    ) -> Self {
        let n = stocks.len();
        let values: Vec<f64> = stocks.iter().map(|s| s.initial).collect();
        let residuals = vec![0.0; rows.len()];
        Self {
            base,
            title: title.into(),
            priority,
            stocks,
            rows,
            pending: values.clone(),
            values,
            last_flows: vec![0.0; n],
            residuals,
            identity_warned: false,
            id: None,
        }
    }

    pub fn stocks(&self) -> &[Stock] {
        &self.stocks
    }

    pub fn rows(&self) -> &[GodleyRow] {
        &self.rows
    }

    /// Committed level of a stock by name.
    pub fn stock_value(&self, name: &str) -> Option<f64> {
        self.stocks
            .iter()
            .position(|s| s.name == name)
            .map(|i| self.values[i])
    }

    /// Accounting-identity residual of each row from the last step.
    pub fn identity_residuals(&self) -> &[f64] {
        &self.residuals
    }
}

impl Element for GodleyTable {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "210"
    }
    fn dump_params(&self) -> Vec<String> {
        let mut out = vec![
            self.title.clone(),
            self.priority.to_string(),
            self.stocks.len().to_string(),
            self.rows.len().to_string(),
        ];
        for stock in &self.stocks {
            out.push(stock.name.clone());
            out.push(stock.class.code().to_string());
            out.push(stock.initial.to_string());
        }
        for row in &self.rows {
            out.push(row.label.clone());
            for cell in &row.cells {
                out.push(
                    cell.as_ref()
                        .map(|c| c.source.clone())
                        .unwrap_or_default(),
                );
            }
        }
        out
    }
    fn post_count(&self) -> usize {
        0
    }
    fn nonlinear(&self) -> bool {
        true
    }
    fn reset(&mut self) {
        for (i, stock) in self.stocks.iter().enumerate() {
            self.values[i] = stock.initial;
            self.pending[i] = stock.initial;
        }
        self.last_flows.iter_mut().for_each(|f| *f = 0.0);
        self.residuals.iter_mut().for_each(|r| *r = 0.0);
        self.identity_warned = false;
        for row in &mut self.rows {
            for cell in row.cells.iter_mut().flatten() {
                cell.state.reset();
            }
        }
    }
    fn register_values(&mut self, values: &mut ComputedValues, id: ElementId) {
        self.id = Some(id);
        for stock in &self.stocks {
            values.register_master(&stock.name, id, self.priority);
        }
        for (i, stock) in self.stocks.iter().enumerate() {
            if values.is_master(&stock.name, id) {
                values.set_external(&stock.name, self.values[i]);
            }
        }
    }
    fn stamp(&mut self, _ctx: &mut SimContext) -> Result<()> {
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let Some(id) = self.id else { return };
        let ncols = self.stocks.len();
        let mut flows = vec![0.0; ncols];

        for (ri, row) in self.rows.iter_mut().enumerate() {
            let mut residual = 0.0;
            for (ci, cell) in row.cells.iter_mut().enumerate() {
                let Some(cell) = cell else { continue };
                let v = {
                    let resolver = ctx.resolver();
                    eval(&cell.compiled.expr, &resolver, &mut cell.state)
                };
                flows[ci] += v;
                residual += self.stocks[ci].class.identity_sign() * v;
            }
            self.residuals[ri] = residual;
        }

        for (ci, flow) in flows.iter().enumerate() {
            if !ctx.within_tolerance(self.last_flows[ci], *flow) {
                ctx.not_converged();
            }
            self.last_flows[ci] = *flow;
            self.pending[ci] = self.values[ci] + ctx.dt * flow;
            let owns = ctx.values.is_master(&self.stocks[ci].name, id);
            if owns {
                let name = self.stocks[ci].name.clone();
                let value = self.pending[ci];
                ctx.values.set(&name, value, id);
            }
        }
    }
    fn step_finished(&mut self, ctx: &mut SimContext) {
        let Some(id) = self.id else { return };
        self.values.copy_from_slice(&self.pending);
        for row in &mut self.rows {
            for cell in row.cells.iter_mut().flatten() {
                cell.state.commit();
            }
        }
        for (ci, stock) in self.stocks.iter().enumerate() {
            if ctx.values.is_master(&stock.name, id) {
                let name = stock.name.clone();
                let value = self.values[ci];
                ctx.values.set(&name, value, id);
                ctx.values.mark_computed(&name);
            }
        }
        // Accounting identity must hold row by row.
        if !self.identity_warned {
            let scale = self
                .values
                .iter()
                .fold(1.0_f64, |acc, v| acc.max(v.abs()));
            if let Some((ri, r)) = self
                .residuals
                .iter()
                .enumerate()
                .find(|(_, r)| r.abs() > 1e-6 * scale)
            {
                log::warn!(
                    "Godley table '{}': row '{}' violates assets - liabilities - equity = 0 \
                     (residual {:.3e})",
                    self.title,
                    self.rows[ri].label,
                    r
                );
                self.identity_warned = true;
            }
        }
    }
    fn info(&self) -> String {
        format!(
            "godley '{}' ({} stocks, {} rows)",
            self.title,
            self.stocks.len(),
            self.rows.len()
        )
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TestRig;

    fn simple_table() -> GodleyTable {
        // Household cash (asset) vs bank deposits (liability):
        // wages flow in, consumption flows out.
        let stocks = vec![
            Stock {
                name: "Cash".into(),
                class: StockClass::Asset,
                initial: 10.0,
            },
            Stock {
                name: "Deposits".into(),
                class: StockClass::Liability,
                initial: 10.0,
            },
        ];
        let rows = vec![
            GodleyRow::new("wages", vec![Some("3".into()), Some("3".into())]).unwrap(),
        ];
        GodleyTable::new(Base::default(), "bank", 5, stocks, rows)
    }

    #[test]
    fn test_stock_integration() {
        let mut rig = TestRig::new(0, 0, 0.5);
        let mut g = simple_table();
        g.allocate();
        g.register_values(&mut rig.values, ElementId(0));

        g.do_step(&mut rig.ctx());
        g.step_finished(&mut rig.ctx());
        // Cash: 10 + 0.5 * 3 = 11.5
        assert_eq!(g.stock_value("Cash"), Some(11.5));

        rig.values.commit_pending_to_current();
        rig.values.commit_current_to_converged();
        assert_eq!(rig.values.get_converged("Cash"), Some(11.5));
    }

    #[test]
    fn test_identity_holds_for_balanced_row() {
        let mut rig = TestRig::new(0, 0, 0.1);
        let mut g = simple_table();
        g.allocate();
        g.register_values(&mut rig.values, ElementId(0));
        g.do_step(&mut rig.ctx());

        // +3 asset, -(+3) liability: balanced
        assert!(g.identity_residuals()[0].abs() < 1e-12);
    }

    #[test]
    fn test_identity_violation_detected() {
        let stocks = vec![Stock {
            name: "Cash".into(),
            class: StockClass::Asset,
            initial: 0.0,
        }];
        let rows = vec![GodleyRow::new("magic", vec![Some("5".into())]).unwrap()];
        let mut g = GodleyTable::new(Base::default(), "broken", 5, stocks, rows);
        g.allocate();

        let mut rig = TestRig::new(0, 0, 0.1);
        g.register_values(&mut rig.values, ElementId(0));
        g.do_step(&mut rig.ctx());
        assert!((g.identity_residuals()[0] - 5.0).abs() < 1e-12);
    }

    #[test]
    fn test_flow_convergence_check() {
        let mut rig = TestRig::new(0, 0, 0.1);
        let mut g = simple_table();
        g.allocate();
        g.register_values(&mut rig.values, ElementId(0));

        let mut ctx = rig.ctx();
        g.do_step(&mut ctx);
        assert!(!ctx.is_converged(), "first flow change must iterate");

        let mut ctx = rig.ctx();
        g.do_step(&mut ctx);
        assert!(ctx.is_converged());
    }
}
