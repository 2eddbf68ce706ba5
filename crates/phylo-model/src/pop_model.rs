//! Population model: compiled matrix equations and the derived ODE.
//!
//! A model owns the birth matrix `F`, migration matrix `G`, death vector
//! `D`, and the auxiliary `dot(·)` equations. Deme right-hand sides are
//! never written by the user; they are derived:
//!
//! ```text
//! dyᵢ/dt = Σⱼ F(j,i) + Σⱼ G(j,i) − Σⱼ G(i,j) − D(i)
//! ```
//!
//! All expressions are compiled once against a flat environment
//! `[t, params…, demes…, aux…, definitions…]`; evaluation reuses the same
//! environment and register buffers across every integrator step.

use crate::equations::{EquationLhs, RawEquation};
use phylo_core::{Error, Parameters, Real, Result, Time};
use phylo_math::expr::{compile_str, Program, Scope};
use phylo_math::{Array, Matrix, OdeSystem};

/// Declarative model input: a named `definitions` block plus the
/// `matrixeqs` assignments.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PopModelDef {
    /// Model identifier, used only for diagnostics.
    pub name: String,
    /// Ordered named scalar bindings, evaluated before any matrix equation.
    pub definitions: Vec<(String, String)>,
    /// The `F`/`G`/`D`/`dot(·)` assignments.
    pub equations: Vec<RawEquation>,
}

/// A compiled population model.
#[derive(Debug)]
pub struct PopModel {
    name: String,
    demes: Vec<String>,
    aux: Vec<String>,
    n_params: usize,

    defs: Vec<Program>,
    births: Vec<Option<Program>>,
    migrations: Vec<Option<Program>>,
    deaths: Vec<Option<Program>>,
    aux_rhs: Vec<Program>,

    y0: Vec<Real>,
    constant: bool,
    diag_f: bool,

    // Evaluation scratch, reused across integrator steps.
    env: Vec<Real>,
    regs: Vec<Real>,
    f_buf: Matrix,
    g_buf: Matrix,
    d_buf: Array,
}

// Environment layout offsets. Slot 0 is always the current time `t`.
const T_SLOT: usize = 0;
const PARAM_OFF: usize = 1;

impl PopModel {
    /// Compile `def` against the parameter store and initial-value
    /// declarations.
    ///
    /// The deme set is derived from the names occurring in `F`, `G`, and
    /// `D` assignments (order of first appearance: `F` entries first, then
    /// `G`, then `D`); auxiliary variables come from `dot(·)` targets.
    /// Construction fails when the derived state set and `initial_values`
    /// disagree, when an entry is assigned twice, or when an expression
    /// references an unresolvable identifier.
    pub fn new(
        def: &PopModelDef,
        params: &Parameters,
        initial_values: &[(String, Real)],
    ) -> Result<Self> {
        let (demes, aux) = derive_state(&def.equations)?;
        let m = demes.len();
        if m == 0 {
            return Err(Error::Model(format!(
                "model `{}` declares no demes",
                def.name
            )));
        }

        // Flat environment scope: [t, params…, demes…, aux…, defs…].
        let mut scope = Scope::new();
        scope.push("t")?;
        for p in params.names() {
            scope.push(p)?;
        }
        for d in &demes {
            scope.push(d)?;
        }
        for a in &aux {
            scope.push(a)?;
        }
        for (name, _) in &def.definitions {
            scope.push(name)?;
        }

        let defs = def
            .definitions
            .iter()
            .map(|(_, src)| compile_str(src, &scope))
            .collect::<Result<Vec<_>>>()?;

        let deme_index = |name: &str| demes.iter().position(|d| d == name).expect("derived");

        let mut births: Vec<Option<Program>> = vec![None; m * m];
        let mut migrations: Vec<Option<Program>> = vec![None; m * m];
        let mut deaths: Vec<Option<Program>> = vec![None; m];
        let mut aux_rhs: Vec<Option<Program>> = vec![None; aux.len()];

        for eq in &def.equations {
            let prog = compile_str(&eq.expr, &scope)?;
            let slot = match &eq.lhs {
                EquationLhs::Birth(a, b) => {
                    &mut births[deme_index(a) * m + deme_index(b)]
                }
                EquationLhs::Migration(a, b) => {
                    let (i, j) = (deme_index(a), deme_index(b));
                    if i == j {
                        return Err(Error::Model(format!(
                            "G({a}, {b}): migration source and destination coincide"
                        )));
                    }
                    &mut migrations[i * m + j]
                }
                EquationLhs::Death(a) => &mut deaths[deme_index(a)],
                EquationLhs::NonDeme(x) => {
                    let k = aux.iter().position(|a| a == x).expect("derived");
                    &mut aux_rhs[k]
                }
            };
            if slot.is_some() {
                return Err(Error::Model(format!(
                    "duplicate assignment to {:?} in model `{}`",
                    eq.lhs, def.name
                )));
            }
            *slot = Some(prog);
        }
        let aux_rhs: Vec<Program> = aux_rhs.into_iter().map(|p| p.expect("derived")).collect();

        let n_params = params.len();
        let n_state = m + aux.len();
        let y0 = ordered_initial_state(&demes, &aux, initial_values)?;

        let constant = is_constant_model(
            &defs,
            births
                .iter()
                .chain(&migrations)
                .flatten()
                .chain(deaths.iter().flatten())
                .chain(&aux_rhs),
            n_params,
            n_state,
        );
        let diag_f = (0..m)
            .all(|i| (0..m).all(|j| i == j || births[i * m + j].is_none()));

        let env_len = 1 + n_params + n_state + defs.len();
        let mut model = Self {
            name: def.name.clone(),
            demes,
            aux,
            n_params,
            defs,
            births,
            migrations,
            deaths,
            aux_rhs,
            y0,
            constant,
            diag_f,
            env: vec![0.0; env_len],
            regs: Vec::new(),
            f_buf: Matrix::zeros(m, m),
            g_buf: Matrix::zeros(m, m),
            d_buf: Array::zeros(m),
        };
        model.bind_params(params.values());
        Ok(model)
    }

    /// Model name (for diagnostics).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of demes `m`.
    pub fn n_demes(&self) -> usize {
        self.demes.len()
    }

    /// Number of auxiliary variables.
    pub fn n_aux(&self) -> usize {
        self.aux.len()
    }

    /// Ordered deme names.
    pub fn demes(&self) -> &[String] {
        &self.demes
    }

    /// Resolve a deme name to its index.
    pub fn deme_index(&self, name: &str) -> Option<usize> {
        self.demes.iter().position(|d| d == name)
    }

    /// The full initial state `[demes…, aux…]`.
    pub fn initial_state(&self) -> &[Real] {
        &self.y0
    }

    /// Rebind one initial value by state-variable name.
    pub fn set_initial_value(&mut self, name: &str, value: Real) -> Result<()> {
        let idx = self
            .demes
            .iter()
            .chain(&self.aux)
            .position(|n| n == name)
            .ok_or_else(|| Error::Config(format!("unknown state variable `{name}`")))?;
        self.y0[idx] = value;
        Ok(())
    }

    /// `true` if every rate expression collapses to a constant once
    /// parameters are bound.
    pub fn is_constant(&self) -> bool {
        self.constant
    }

    /// `true` if only diagonal `F(i,i)` entries are symbolically present.
    pub fn is_diag_f(&self) -> bool {
        self.diag_f
    }

    /// Copy the current parameter values into the evaluation environment.
    pub fn bind_params(&mut self, values: &[Real]) {
        debug_assert_eq!(values.len(), self.n_params);
        self.env[PARAM_OFF..PARAM_OFF + self.n_params].copy_from_slice(values);
    }

    /// Instantiate `(F, G)` at state `y` and time `t`.
    ///
    /// The returned borrows are into internal buffers overwritten by the
    /// next evaluation.
    pub fn frame_at(&mut self, t: Time, y: &[Real]) -> (&Matrix, &Matrix) {
        self.eval_matrices(t, y);
        (&self.f_buf, &self.g_buf)
    }

    fn state_off(&self) -> usize {
        PARAM_OFF + self.n_params
    }

    fn eval_matrices(&mut self, t: Time, y: &[Real]) {
        let off = self.state_off();
        self.env[T_SLOT] = t;
        self.env[off..off + y.len()].copy_from_slice(y);
        let def_off = off + y.len();
        for (k, prog) in self.defs.iter().enumerate() {
            self.env[def_off + k] = prog.eval(&self.env, &mut self.regs);
        }
        let m = self.demes.len();
        for i in 0..m {
            for j in 0..m {
                self.f_buf[(i, j)] = match &self.births[i * m + j] {
                    Some(p) => p.eval(&self.env, &mut self.regs),
                    None => 0.0,
                };
                self.g_buf[(i, j)] = match &self.migrations[i * m + j] {
                    Some(p) => p.eval(&self.env, &mut self.regs),
                    None => 0.0,
                };
            }
            self.d_buf[i] = match &self.deaths[i] {
                Some(p) => p.eval(&self.env, &mut self.regs),
                None => 0.0,
            };
        }
    }
}

impl OdeSystem for PopModel {
    fn dim(&self) -> usize {
        self.demes.len() + self.aux.len()
    }

    fn rhs(&mut self, t: Real, y: &[Real], dydt: &mut [Real]) {
        self.eval_matrices(t, y);
        let m = self.demes.len();
        for i in 0..m {
            // births in + migrations in − migrations out − deaths
            dydt[i] = self.f_buf.col_sum(i) + self.g_buf.col_sum(i)
                - self.g_buf.row_sum(i)
                - self.d_buf[i];
        }
        for (k, prog) in self.aux_rhs.iter().enumerate() {
            dydt[m + k] = prog.eval(&self.env, &mut self.regs);
        }
    }
}

/// Derive `(demes, aux)` from equation left-hand sides.
///
/// Demes appear in order of first occurrence, `F` assignments first, then
/// `G`, then `D`; auxiliary variables in `dot(·)` order.
fn derive_state(equations: &[RawEquation]) -> Result<(Vec<String>, Vec<String>)> {
    let mut demes: Vec<String> = Vec::new();
    let push_deme = |name: &str, demes: &mut Vec<String>| {
        if !demes.iter().any(|d| d == name) {
            demes.push(name.to_string());
        }
    };
    for eq in equations {
        if let EquationLhs::Birth(a, b) = &eq.lhs {
            push_deme(a, &mut demes);
            push_deme(b, &mut demes);
        }
    }
    for eq in equations {
        if let EquationLhs::Migration(a, b) = &eq.lhs {
            push_deme(a, &mut demes);
            push_deme(b, &mut demes);
        }
    }
    for eq in equations {
        if let EquationLhs::Death(a) = &eq.lhs {
            push_deme(a, &mut demes);
        }
    }

    let mut aux: Vec<String> = Vec::new();
    for eq in equations {
        if let EquationLhs::NonDeme(x) = &eq.lhs {
            if demes.iter().any(|d| d == x) {
                return Err(Error::Model(format!(
                    "`{x}` is both a deme and a dot(·) target"
                )));
            }
            if aux.iter().any(|a| a == x) {
                return Err(Error::Model(format!("duplicate dot({x}) equation")));
            }
            aux.push(x.clone());
        }
    }
    Ok((demes, aux))
}

fn ordered_initial_state(
    demes: &[String],
    aux: &[String],
    initial_values: &[(String, Real)],
) -> Result<Vec<Real>> {
    let lookup = |name: &String| -> Result<Real> {
        let mut found = None;
        for (n, v) in initial_values {
            if n == name {
                if found.is_some() {
                    return Err(Error::Config(format!(
                        "initial value for `{name}` given twice"
                    )));
                }
                found = Some(*v);
            }
        }
        found.ok_or_else(|| Error::Model(format!("missing initial value for `{name}`")))
    };
    for (n, _) in initial_values {
        if !demes.contains(n) && !aux.contains(n) {
            return Err(Error::Model(format!(
                "initial value for `{n}` does not match any deme or dot(·) variable"
            )));
        }
    }
    demes.iter().chain(aux).map(lookup).collect()
}

/// A model is constant when no expression reads `t`, the state, or a
/// state-dependent definition.
fn is_constant_model<'a>(
    defs: &[Program],
    equations: impl Iterator<Item = &'a Program>,
    n_params: usize,
    n_state: usize,
) -> bool {
    let state_from = (PARAM_OFF + n_params) as u16;
    let state_to = state_from + n_state as u16;
    let def_off = state_to;

    // Definitions may reference earlier definitions; propagate constancy.
    let mut def_const = vec![false; defs.len()];
    for (k, prog) in defs.iter().enumerate() {
        def_const[k] = !prog.reads_in(T_SLOT as u16, (T_SLOT + 1) as u16)
            && !prog.reads_in(state_from, state_to)
            && prog
                .env_reads()
                .iter()
                .filter(|&&s| s >= def_off)
                .all(|&s| def_const[(s - def_off) as usize]);
    }

    equations.into_iter().all(|prog| {
        !prog.reads_in(T_SLOT as u16, (T_SLOT + 1) as u16)
            && !prog.reads_in(state_from, state_to)
            && prog
                .env_reads()
                .iter()
                .filter(|&&s| s >= def_off)
                .all(|&s| def_const[(s - def_off) as usize])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equations::parse_equations;
    use approx::assert_relative_eq;

    fn sir_def() -> PopModelDef {
        PopModelDef {
            name: "sir2".into(),
            definitions: vec![("N".into(), "S + I0 + I1".into())],
            equations: parse_equations(
                "F(I0, I0) = beta0 * S * I0 / N;\n\
                 F(I1, I1) = beta1 * S * I1 / N;\n\
                 G(I0, I1) = m01 * I0;\n\
                 D(I0) = gamma0 * I0;\n\
                 D(I1) = gamma1 * I1;\n\
                 dot(S) = b * N - beta0 * S * I0 / N - beta1 * S * I1 / N;",
            )
            .unwrap(),
        }
    }

    fn sir_params() -> Parameters {
        Parameters::from_pairs([
            ("beta0", 0.001),
            ("beta1", 0.0001),
            ("gamma0", 1.0),
            ("gamma1", 0.1111),
            ("m01", 0.05),
            ("b", 0.01),
        ])
        .unwrap()
    }

    fn sir_inits() -> Vec<(String, Real)> {
        vec![
            ("I0".into(), 1.0),
            ("I1".into(), 0.0),
            ("S".into(), 999.0),
        ]
    }

    #[test]
    fn derives_demes_in_declaration_order() {
        let model = PopModel::new(&sir_def(), &sir_params(), &sir_inits()).unwrap();
        assert_eq!(model.demes(), &["I0".to_string(), "I1".to_string()]);
        assert_eq!(model.n_aux(), 1);
        assert_eq!(model.initial_state(), &[1.0, 0.0, 999.0]);
    }

    #[test]
    fn rhs_composition() {
        let mut model = PopModel::new(&sir_def(), &sir_params(), &sir_inits()).unwrap();
        let y = [1.0, 0.0, 999.0];
        let mut dydt = [0.0; 3];
        model.rhs(0.0, &y, &mut dydt);

        let n = 1000.0;
        let birth0 = 0.001 * 999.0 * 1.0 / n;
        // dI0/dt = F(I0,I0) − G(I0,I1) − D(I0)
        assert_relative_eq!(dydt[0], birth0 - 0.05 * 1.0 - 1.0 * 1.0, epsilon = 1e-12);
        // dI1/dt = migration in
        assert_relative_eq!(dydt[1], 0.05 * 1.0, epsilon = 1e-12);
        // dot(S) evaluated directly
        assert_relative_eq!(dydt[2], 0.01 * n - birth0, epsilon = 1e-12);
    }

    #[test]
    fn frame_instantiation() {
        let mut model = PopModel::new(&sir_def(), &sir_params(), &sir_inits()).unwrap();
        let (f, g) = model.frame_at(0.0, &[1.0, 0.0, 999.0]);
        assert_relative_eq!(f[(0, 0)], 0.001 * 999.0 / 1000.0, epsilon = 1e-12);
        assert_eq!(f[(0, 1)], 0.0);
        assert_relative_eq!(g[(0, 1)], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn flags() {
        let model = PopModel::new(&sir_def(), &sir_params(), &sir_inits()).unwrap();
        assert!(model.is_diag_f());
        assert!(!model.is_constant());

        let const_def = PopModelDef {
            name: "const1".into(),
            definitions: vec![],
            equations: parse_equations("F(a, a) = c; D(a) = 0;").unwrap(),
        };
        let params = Parameters::from_pairs([("c", 2.0)]).unwrap();
        let model =
            PopModel::new(&const_def, &params, &[("a".into(), 10.0)]).unwrap();
        assert!(model.is_constant());
        assert!(model.is_diag_f());
    }

    #[test]
    fn off_diagonal_birth_clears_diag_flag() {
        let def = PopModelDef {
            name: "cross".into(),
            definitions: vec![],
            equations: parse_equations("F(a, b) = c; D(b) = 0;").unwrap(),
        };
        let params = Parameters::from_pairs([("c", 2.0)]).unwrap();
        let model = PopModel::new(
            &def,
            &params,
            &[("a".into(), 1.0), ("b".into(), 1.0)],
        )
        .unwrap();
        assert!(!model.is_diag_f());
    }

    #[test]
    fn initial_value_mismatch() {
        let missing = vec![("I0".into(), 1.0), ("S".into(), 999.0)];
        let err = PopModel::new(&sir_def(), &sir_params(), &missing).unwrap_err();
        assert!(matches!(err, Error::Model(_)));

        let extra = {
            let mut v = sir_inits();
            v.push(("R".into(), 0.0));
            v
        };
        assert!(PopModel::new(&sir_def(), &sir_params(), &extra).is_err());
    }

    #[test]
    fn unresolved_rate_identifier() {
        let def = PopModelDef {
            name: "bad".into(),
            definitions: vec![],
            equations: parse_equations("F(a, a) = beta * a; D(a) = 0;").unwrap(),
        };
        let params = Parameters::new();
        let err = PopModel::new(&def, &params, &[("a".into(), 1.0)]).unwrap_err();
        assert_eq!(err, Error::Name { ident: "beta".into() });
    }

    #[test]
    fn self_migration_rejected() {
        let def = PopModelDef {
            name: "selfg".into(),
            definitions: vec![],
            equations: parse_equations("F(a, a) = 1; G(a, a) = 1;").unwrap(),
        };
        let params = Parameters::new();
        assert!(PopModel::new(&def, &params, &[("a".into(), 1.0)]).is_err());
    }
}
