//! Equation tables and the ODE element.
//!
//! A table row `name ~ expr` (rate form) or `name = expr` (algebraic
//! form) produces a named output. Rows are classified at compile time
//! (alias / constant / linear / dynamic) so a table of plain
//! bookkeeping rows costs no iteration and very little matrix.
//!
//! Non-alias rows own one internal node and one voltage-source row; the
//! row name registers in the labeled-node registry (master-priority
//! permitting) so other expressions can reference it as a node.

use std::any::Any;

use volta_core::{ComputedValues, ElementId, LabeledNodes, NodeId, Result};
use volta_expr::{Compiled, ExprState, ParseError, RowClass, classify, eval, parse};

use crate::context::SimContext;
use crate::element::{Base, Element};

/// How a row's source text binds name to expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowFlavor {
    /// `name = expr` - the output is the expression value.
    Algebraic,
    /// `name ~ expr` - the output integrates the expression.
    Rate,
}

/// One compiled table row.
#[derive(Debug, Clone)]
pub struct TableRow {
    pub name: String,
    pub flavor: RowFlavor,
    /// Expression text as the user wrote it (kept for export).
    pub source: String,
    compiled: Compiled,
    state: ExprState,
    class: RowClass,
    /// Set at stamp time when a linear row's references only resolve
    /// through the computed-value registry.
    demoted: bool,
    last_out: f64,
    value: f64,
}

impl TableRow {
    pub fn new(
        name: impl Into<String>,
        flavor: RowFlavor,
        source: impl Into<String>,
    ) -> std::result::Result<Self, ParseError> {
        let source = source.into();
        let compiled = match flavor {
            RowFlavor::Algebraic => parse(&source)?,
            // A rate row is its own integral.
            RowFlavor::Rate => parse(&format!("integrate({source})"))?,
        };
        let class = match flavor {
            RowFlavor::Algebraic => classify(&compiled.expr),
            RowFlavor::Rate => RowClass::Dynamic,
        };
        let state = ExprState::new(compiled.num_slots);
        Ok(Self {
            name: name.into(),
            flavor,
            source,
            compiled,
            state,
            class,
            demoted: false,
            last_out: 0.0,
            value: 0.0,
        })
    }

    pub fn class(&self) -> &RowClass {
        &self.class
    }

    fn is_alias(&self) -> bool {
        matches!(self.class, RowClass::Alias(_))
    }

    fn dynamic(&self) -> bool {
        self.demoted || matches!(self.class, RowClass::Dynamic)
    }

    /// Seed the committed output (initial stock level for rate rows).
    pub fn seed(&mut self, value: f64) {
        self.value = value;
        self.last_out = value;
        if self.flavor == RowFlavor::Rate {
            self.state.seed_slot(0, value);
        }
    }
}

/// Multi-row equation table. An equation element is a one-row table.
#[derive(Debug)]
pub struct EquationTable {
    base: Base,
    pub title: String,
    pub priority: u8,
    rows: Vec<TableRow>,
    id: Option<ElementId>,
    has_dynamic: bool,
}

impl EquationTable {
    pub fn new(base: Base, title: impl Into<String>, priority: u8, rows: Vec<TableRow>) -> Self {
        Self {
            base,
            title: title.into(),
            priority,
            rows,
            id: None,
            has_dynamic: false,
        }
    }

    /// Single-equation convenience constructor.
    pub fn single(
        base: Base,
        name: &str,
        flavor: RowFlavor,
        source: &str,
    ) -> std::result::Result<Self, ParseError> {
        let row = TableRow::new(name, flavor, source)?;
        Ok(Self::new(base, name.to_string(), 5, vec![row]))
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut [TableRow] {
        &mut self.rows
    }

    /// Latest output of a row by name.
    pub fn row_value(&self, name: &str) -> Option<f64> {
        self.rows.iter().find(|r| r.name == name).map(|r| r.value)
    }

    /// Internal-node slot (index into `base.nodes`) for non-alias row `i`.
    fn node_slot(&self, row: usize) -> usize {
        self.rows[..row].iter().filter(|r| !r.is_alias()).count()
    }

    fn vs_slot(&self, row: usize) -> usize {
        self.node_slot(row)
    }
}

impl Element for EquationTable {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "209"
    }
    fn dump_params(&self) -> Vec<String> {
        let mut out = vec![
            self.title.clone(),
            self.priority.to_string(),
            self.rows.len().to_string(),
        ];
        for row in &self.rows {
            out.push(row.name.clone());
            out.push(
                match row.flavor {
                    RowFlavor::Algebraic => "=",
                    RowFlavor::Rate => "~",
                }
                .to_string(),
            );
            out.push(row.source.clone());
            out.push(row.value.to_string());
        }
        out
    }
    fn post_count(&self) -> usize {
        0
    }
    fn internal_node_count(&self) -> usize {
        self.rows.iter().filter(|r| !r.is_alias()).count()
    }
    fn voltage_source_count(&self) -> usize {
        self.internal_node_count()
    }
    fn nonlinear(&self) -> bool {
        self.has_dynamic
    }
    fn connects_to_ground(&self) -> bool {
        self.internal_node_count() > 0
    }
    fn reset(&mut self) {
        for row in &mut self.rows {
            row.state.reset();
            row.last_out = 0.0;
            row.value = 0.0;
        }
        self.has_dynamic = false;
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
    }
    fn register_values(&mut self, values: &mut ComputedValues, id: ElementId) {
        self.id = Some(id);
        for row in &self.rows {
            values.register_master(&row.name, id, self.priority);
        }
        // Seed committed outputs so first-step references see them.
        for row in &self.rows {
            if values.is_master(&row.name, id) {
                values.set_external(&row.name, row.value);
            }
        }
    }
    fn register_labels(
        &mut self,
        labels: &mut LabeledNodes,
        values: &ComputedValues,
        id: ElementId,
    ) {
        for (i, row) in self.rows.iter().enumerate() {
            if row.is_alias() || !values.is_master(&row.name, id) {
                continue;
            }
            let node = self.base.nodes[self.node_slot(i)];
            labels.register(&row.name, node);
        }
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        self.has_dynamic = false;
        for i in 0..self.rows.len() {
            if self.rows[i].is_alias() {
                continue;
            }
            let node = self.base.nodes[self.node_slot(i)];
            let vs = self.base.vs[self.vs_slot(i)];
            let row_idx = ctx.mna.vsource_row(vs);
            let class = self.rows[i].class.clone();

            // Linear rows fall back to the dynamic path when a
            // reference only resolves through the value registry.
            let resolved: Option<Vec<(usize, f64)>> = match &class {
                RowClass::Linear { terms, .. } => terms
                    .iter()
                    .map(|(name, coeff)| {
                        ctx.labels
                            .resolve(name)
                            .and_then(|n| n.matrix_index())
                            .map(|col| (col, *coeff))
                    })
                    .collect(),
                _ => None,
            };

            match (class, resolved) {
                (RowClass::Constant(v), _) => {
                    ctx.mna.stamp_voltage_source(node, NodeId::GROUND, vs, v);
                }
                (RowClass::Linear { constant, .. }, Some(cols)) => {
                    ctx.mna
                        .stamp_voltage_source(node, NodeId::GROUND, vs, constant);
                    for (col, coeff) in cols {
                        ctx.mna.stamp_matrix(row_idx, col, -coeff);
                    }
                }
                (RowClass::Linear { .. }, None) => {
                    self.rows[i].demoted = true;
                    self.has_dynamic = true;
                    ctx.mna.stamp_voltage_source_dynamic(node, NodeId::GROUND, vs);
                    ctx.mna.stamp_nonlinear(row_idx);
                }
                _ => {
                    self.has_dynamic = true;
                    ctx.mna.stamp_voltage_source_dynamic(node, NodeId::GROUND, vs);
                    ctx.mna.stamp_nonlinear(row_idx);
                }
            }
        }
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let Some(id) = self.id else { return };
        for i in 0..self.rows.len() {
            if !self.rows[i].dynamic() {
                continue;
            }
            let vs = self.base.vs[self.vs_slot(i)];
            let owns = ctx.values.is_master(&self.rows[i].name, id);
            let row = &mut self.rows[i];
            let out = {
                let resolver = ctx.resolver();
                eval(&row.compiled.expr, &resolver, &mut row.state)
            };
            if !ctx.within_tolerance(row.last_out, out) {
                ctx.not_converged();
            }
            row.last_out = out;
            row.value = out;
            ctx.mna.update_voltage_source(vs, out);
            if owns {
                let name = row.name.clone();
                ctx.values.set(&name, out, id);
            }
        }
    }
    fn step_finished(&mut self, ctx: &mut SimContext) {
        let Some(id) = self.id else { return };
        for i in 0..self.rows.len() {
            let slot = self.node_slot(i);
            let node = self.base.nodes.get(slot).copied();
            let owns = ctx.values.is_master(&self.rows[i].name, id);
            let row = &mut self.rows[i];
            row.state.commit();
            if !row.dynamic() {
                // Alias and stamped rows publish their solved value so
                // display surfaces read everything through one registry.
                row.value = match &row.class {
                    RowClass::Alias(target) => ctx
                        .labels
                        .resolve(target)
                        .map(|n| ctx.node_voltage(n))
                        .unwrap_or_else(|| ctx.values.get(target).unwrap_or(0.0)),
                    _ => node.map(|n| ctx.node_voltage(n)).unwrap_or(0.0),
                };
            }
            if owns {
                let name = row.name.clone();
                let value = row.value;
                ctx.values.set(&name, value, id);
                ctx.values.mark_computed(&name);
            }
        }
    }
    fn info(&self) -> String {
        format!("table '{}' ({} rows)", self.title, self.rows.len())
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ────────────────────────────── ODE ──────────────────────────────

/// First-order ODE element: `dy/dt = f(...)`, output post drives `y`.
#[derive(Debug)]
pub struct OdeElement {
    base: Base,
    pub name: String,
    pub source: String,
    compiled: Compiled,
    state: ExprState,
    y: f64,
    y_pending: f64,
    last_out: f64,
    pub initial: f64,
    id: Option<ElementId>,
}

impl OdeElement {
    pub fn new(
        base: Base,
        name: impl Into<String>,
        source: &str,
        initial: f64,
    ) -> std::result::Result<Self, ParseError> {
        let compiled = parse(source)?;
        let state = ExprState::new(compiled.num_slots);
        Ok(Self {
            base,
            name: name.into(),
            source: source.to_string(),
            compiled,
            state,
            y: initial,
            y_pending: initial,
            last_out: initial,
            initial,
            id: None,
        })
    }

    pub fn value(&self) -> f64 {
        self.y
    }

    /// Seed the committed state (restoring a dumped circuit).
    pub fn seed(&mut self, y: f64) {
        self.y = y;
        self.y_pending = y;
        self.last_out = y;
    }
}

impl Element for OdeElement {
    fn base(&self) -> &Base {
        &self.base
    }
    fn base_mut(&mut self) -> &mut Base {
        &mut self.base
    }
    fn dump_code(&self) -> &'static str {
        "206"
    }
    fn dump_params(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.source.clone(),
            self.initial.to_string(),
            self.y.to_string(),
        ]
    }
    fn post_count(&self) -> usize {
        1
    }
    fn voltage_source_count(&self) -> usize {
        1
    }
    fn nonlinear(&self) -> bool {
        true
    }
    fn connects_to_ground(&self) -> bool {
        true
    }
    fn get_connection(&self, _a: usize, _b: usize) -> bool {
        false
    }
    fn reset(&mut self) {
        self.y = self.initial;
        self.y_pending = self.initial;
        self.last_out = self.initial;
        self.state.reset();
        let b = self.base_mut();
        b.volts.iter_mut().for_each(|v| *v = 0.0);
        b.current = 0.0;
    }
    fn register_values(&mut self, values: &mut ComputedValues, id: ElementId) {
        self.id = Some(id);
        values.register_master(&self.name, id, 5);
        if values.is_master(&self.name, id) {
            values.set_external(&self.name, self.y);
        }
    }
    fn register_labels(
        &mut self,
        labels: &mut LabeledNodes,
        values: &ComputedValues,
        id: ElementId,
    ) {
        if values.is_master(&self.name, id) {
            labels.register(&self.name, self.base.nodes[0]);
        }
    }
    fn stamp(&mut self, ctx: &mut SimContext) -> Result<()> {
        let vs = self.base.vs[0];
        let row = ctx.mna.vsource_row(vs);
        ctx.mna
            .stamp_voltage_source_dynamic(self.base.nodes[0], NodeId::GROUND, vs);
        ctx.mna.stamp_nonlinear(row);
        Ok(())
    }
    fn do_step(&mut self, ctx: &mut SimContext) {
        let rate = {
            let resolver = ctx.resolver();
            eval(&self.compiled.expr, &resolver, &mut self.state)
        };
        let y_new = self.y + ctx.dt * rate;
        if !ctx.within_tolerance(self.last_out, y_new) {
            ctx.not_converged();
        }
        self.last_out = y_new;
        self.y_pending = y_new;
        ctx.mna.update_voltage_source(self.base.vs[0], y_new);
        if let Some(id) = self.id {
            let name = self.name.clone();
            ctx.values.set(&name, y_new, id);
        }
    }
    fn step_finished(&mut self, ctx: &mut SimContext) {
        self.y = self.y_pending;
        self.state.commit();
        if let Some(id) = self.id {
            let name = self.name.clone();
            ctx.values.mark_computed(&name);
            let y = self.y;
            ctx.values.set(&name, y, id);
        }
    }
    fn set_branch_current(&mut self, _local: usize, current: f64) {
        self.base.current = current;
    }
    fn info(&self) -> String {
        format!("ode {} = {:.6}", self.name, self.y)
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

    #[test]
    fn test_row_classification_and_resources() {
        let rows = vec![
            TableRow::new("A", RowFlavor::Algebraic, "Y").unwrap(),
            TableRow::new("K", RowFlavor::Algebraic, "42").unwrap(),
            TableRow::new("L", RowFlavor::Algebraic, "2*Y + 1").unwrap(),
            TableRow::new("D", RowFlavor::Algebraic, "Y*Y").unwrap(),
        ];
        let t = EquationTable::new(Base::default(), "test", 5, rows);

        assert!(matches!(t.rows()[0].class(), RowClass::Alias(_)));
        assert!(matches!(t.rows()[1].class(), RowClass::Constant(_)));
        assert!(matches!(t.rows()[2].class(), RowClass::Linear { .. }));
        assert!(matches!(t.rows()[3].class(), RowClass::Dynamic));

        // Alias rows cost nothing; the other three get a node + source
        assert_eq!(t.internal_node_count(), 3);
        assert_eq!(t.voltage_source_count(), 3);
    }

    #[test]
    fn test_rate_rows_are_dynamic() {
        let row = TableRow::new("H", RowFlavor::Rate, "YD - C").unwrap();
        assert!(matches!(row.class(), RowClass::Dynamic));
    }

    #[test]
    fn test_constant_row_stamps_source() {
        let rows = vec![TableRow::new("G", RowFlavor::Algebraic, "20").unwrap()];
        let mut t = EquationTable::new(Base::default(), "gov", 5, rows);
        t.allocate();
        t.set_node(0, NodeId(1));
        t.set_voltage_source(0, 0);

        let mut rig = TestRig::new(1, 1, 0.1);
        t.register_values(&mut rig.values, ElementId(0));
        t.stamp(&mut rig.ctx()).unwrap();

        assert_eq!(rig.mna.rhs()[1], 20.0);
        assert!(!t.nonlinear(), "constant-only table must not iterate");
    }

    #[test]
    fn test_linear_row_falls_back_without_node() {
        // "H" resolves only through the value registry, so the row
        // cannot stamp as a VCVS and demotes to the dynamic path.
        let rows = vec![TableRow::new("C", RowFlavor::Algebraic, "0.4*H").unwrap()];
        let mut t = EquationTable::new(Base::default(), "cons", 5, rows);
        t.allocate();
        t.set_node(0, NodeId(1));
        t.set_voltage_source(0, 0);

        let mut rig = TestRig::new(1, 1, 0.1);
        t.register_values(&mut rig.values, ElementId(0));
        t.stamp(&mut rig.ctx()).unwrap();

        assert!(t.nonlinear(), "demoted row must iterate");
        assert!(rig.mna.row_info()[1].ls_changes);
    }

    #[test]
    fn test_linear_row_stamps_when_label_exists() {
        let rows = vec![TableRow::new("C", RowFlavor::Algebraic, "0.5*Y").unwrap()];
        let mut t = EquationTable::new(Base::default(), "cons", 5, rows);
        t.allocate();
        t.set_node(0, NodeId(1));
        t.set_voltage_source(0, 0);

        let mut rig = TestRig::new(2, 1, 0.1);
        rig.labels.register("Y", NodeId(2));
        t.register_values(&mut rig.values, ElementId(0));
        t.stamp(&mut rig.ctx()).unwrap();

        assert!(!t.nonlinear());
        // Branch row: v(C) - 0.5*v(Y) = 0
        let row = 2;
        assert_eq!(rig.mna.matrix()[(row, 0)], 1.0);
        assert_eq!(rig.mna.matrix()[(row, 1)], -0.5);
    }

    #[test]
    fn test_ode_element_integrates() {
        let mut rig = TestRig::new(1, 1, 0.5);
        let mut ode = OdeElement::new(Base::default(), "y", "3", 1.0).unwrap();
        ode.allocate();
        ode.set_node(0, NodeId(1));
        ode.set_voltage_source(0, 0);
        ode.register_values(&mut rig.values, ElementId(0));
        ode.stamp(&mut rig.ctx()).unwrap();

        ode.do_step(&mut rig.ctx());
        assert_eq!(rig.mna.rhs()[1], 2.5); // y + dt*3 = 1 + 1.5
        ode.step_finished(&mut rig.ctx());
        assert_eq!(ode.value(), 2.5);
    }
}
