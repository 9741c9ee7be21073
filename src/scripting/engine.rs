use super::{CompiledScript, ScriptError};
use rhai::{Dynamic, Engine, Scope};

/// Rhai engine configured with safety limits and waveform helpers.
pub struct ScriptEngine {
    engine: Engine,
}

impl ScriptEngine {
    pub fn new() -> Self {
        let mut engine = Engine::new();
        Self::configure_engine(&mut engine);
        Self { engine }
    }

    /// Configure the Rhai engine with built-in functions and safety limits
    fn configure_engine(engine: &mut Engine) {
        engine.set_max_expr_depths(64, 64);
        engine.set_max_call_levels(32);
        engine.set_max_operations(10_000);
        engine.set_max_string_size(10_000);
        engine.set_max_array_size(1_000);
        engine.set_max_map_size(1_000);

        engine.register_fn("clamp", |v: f64, lo: f64, hi: f64| -> f64 {
            if lo <= hi {
                v.clamp(lo, hi)
            } else {
                v
            }
        });

        engine.register_fn("deadband", |v: f64, center: f64, width: f64| -> f64 {
            if (v - center).abs() < width / 2.0 {
                center
            } else {
                v
            }
        });

        engine.register_fn("db", |v: f64| -> f64 {
            let mag = v.abs();
            if mag > 1e-10 {
                20.0 * mag.log10()
            } else {
                -200.0
            }
        });

        engine.register_fn(
            "hysteresis",
            |v: f64, prev: f64, lo: f64, hi: f64, lo_val: f64, hi_val: f64| -> f64 {
                if v >= hi {
                    hi_val
                } else if v <= lo {
                    lo_val
                } else if prev.is_nan() {
                    lo_val
                } else {
                    prev
                }
            },
        );
    }

    /// Compile a script. Its value is the value of the last expression.
    pub fn compile(&self, source: &str) -> Result<CompiledScript, ScriptError> {
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| ScriptError::Compile(e.to_string()))?;
        Ok(CompiledScript {
            ast,
            source: source.to_string(),
        })
    }

    /// Check that a script compiles.
    pub fn validate(&self, source: &str) -> Result<(), ScriptError> {
        self.compile(source).map(|_| ())
    }

    /// Apply `script` to every sample.
    ///
    /// `t0` is the time of sample 0 and `dt` the sample period, both seconds.
    pub fn map_samples(
        &self,
        script: &CompiledScript,
        samples: &[f64],
        t0: f64,
        dt: f64,
    ) -> Result<Vec<f64>, ScriptError> {
        let mut scope = Scope::new();
        scope
            .push("x", 0.0_f64)
            .push("value", 0.0_f64)
            .push("i", 0_i64)
            .push("t", t0)
            .push("dt", dt)
            .push("prev", f64::NAN);
        // Script-level `let`s are dropped after every sample
        let base = scope.len();
        let mut out = Vec::with_capacity(samples.len());
        let mut prev = f64::NAN;

        for (i, &x) in samples.iter().enumerate() {
            scope.set_value("x", x);
            scope.set_value("value", x);
            scope.set_value("i", i as i64);
            scope.set_value("t", t0 + dt * i as f64);
            scope.set_value("dt", dt);
            scope.set_value("prev", prev);

            let result = self
                .engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, &script.ast)
                .map_err(|e| ScriptError::Runtime(e.to_string()))?;
            scope.rewind(base);
            prev = Self::as_number(result)?;
            out.push(prev);
        }
        Ok(out)
    }

    /// Evaluate a script for one value, with `i`, `t` and `dt` zero.
    pub fn eval(&self, source: &str, x: f64) -> Result<f64, ScriptError> {
        let script = self.compile(source)?;
        let out = self.map_samples(&script, &[x], 0.0, 0.0)?;
        out.first()
            .copied()
            .ok_or_else(|| ScriptError::Runtime("no output".into()))
    }

    fn as_number(value: Dynamic) -> Result<f64, ScriptError> {
        if let Ok(f) = value.as_float() {
            Ok(f)
        } else if let Ok(i) = value.as_int() {
            Ok(i as f64)
        } else {
            Err(ScriptError::NotNumeric(value.type_name().to_string()))
        }
    }
}

impl Default for ScriptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_expression() {
        let engine = ScriptEngine::new();
        assert_eq!(engine.eval("x * 2.0", 21.0).unwrap(), 42.0);
        assert_eq!(engine.eval("value + 1.0", 1.0).unwrap(), 2.0);
    }

    #[test]
    fn test_integer_result_widens() {
        let engine = ScriptEngine::new();
        assert_eq!(engine.eval("7", 0.0).unwrap(), 7.0);
    }

    #[test]
    fn test_time_and_index() {
        let engine = ScriptEngine::new();
        let script = engine.compile("t + i.to_float()").unwrap();
        let out = engine.map_samples(&script, &[0.0, 0.0, 0.0], 1.0, 0.5).unwrap();
        assert_eq!(out, vec![1.0, 2.5, 4.0]);
    }

    #[test]
    fn test_prev_is_previous_output() {
        let engine = ScriptEngine::new();
        let script = engine
            .compile("if prev.is_nan() { x } else { prev + x }")
            .unwrap();
        let out = engine.map_samples(&script, &[1.0, 1.0, 1.0], 0.0, 1.0).unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_let_bindings_do_not_leak_between_samples() {
        let engine = ScriptEngine::new();
        let script = engine
            .compile("let seen = is_def_var(\"y\"); let y = x * 2.0; if seen { -1.0 } else { y }")
            .unwrap();
        let out = engine.map_samples(&script, &[1.0, 2.0, 3.0], 0.0, 1.0).unwrap();
        assert_eq!(out, vec![2.0, 4.0, 6.0]);
    }

    #[test]
    fn test_shadowed_input_is_reset_each_sample() {
        let engine = ScriptEngine::new();
        let script = engine.compile("let x = x + 100.0; x").unwrap();
        let out = engine.map_samples(&script, &[1.0, 2.0], 0.0, 1.0).unwrap();
        assert_eq!(out, vec![101.0, 102.0]);
    }

    #[test]
    fn test_let_script_scales_linearly() {
        let engine = ScriptEngine::new();
        let script = engine.compile("let y = x * 2.0; y").unwrap();
        let samples = vec![1.0; 20_000];

        let started = std::time::Instant::now();
        let out = engine.map_samples(&script, &samples, 0.0, 1.0).unwrap();
        assert_eq!(out.len(), samples.len());
        assert!(out.iter().all(|v| *v == 2.0));
        // A growing scope takes minutes here
        assert!(started.elapsed() < std::time::Duration::from_secs(20));
    }

    #[test]
    fn test_helpers() {
        let engine = ScriptEngine::new();
        assert_eq!(engine.eval("clamp(x, 0.0, 1.0)", 3.0).unwrap(), 1.0);
        assert_eq!(engine.eval("deadband(x, 0.0, 0.2)", 0.05).unwrap(), 0.0);
        assert_eq!(engine.eval("db(x)", 10.0).unwrap(), 20.0);
    }

    #[test]
    fn test_errors() {
        let engine = ScriptEngine::new();
        assert!(matches!(engine.compile("x +"), Err(ScriptError::Compile(_))));
        assert!(matches!(
            engine.eval("\"text\"", 1.0),
            Err(ScriptError::NotNumeric(_))
        ));
        assert!(matches!(
            engine.eval("undefined_fn(x)", 1.0),
            Err(ScriptError::Runtime(_))
        ));
    }
}
