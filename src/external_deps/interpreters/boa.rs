use boa_engine::{Context, Source};

use super::{InterpreterError, InterpreterResult, JavascriptInterpreter};

/// Default interpreter backed by the Boa JavaScript engine.
#[derive(Debug, Default)]
pub struct BoaJavascriptInterpreter;

impl BoaJavascriptInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn build_prelude(&self, host: &str) -> String {
        let host = host.replace(['"', '\\'], "");
        format!(
            r#"
var __host = "{host}";
var location = {{
    href: "https://" + __host + "/",
    hostname: __host,
    protocol: "https:",
    port: "",
    reload: function() {{}},
    replace: function() {{}}
}};
var document = {{ cookie: "", location: location }};
var window = {{ location: location, document: document }};
document.defaultView = window;
var navigator = {{ userAgent: "Mozilla/5.0", language: "en-US" }};
window.navigator = navigator;
function setTimeout(cb) {{ if (typeof cb === "function") {{ return cb(); }} }}
function clearTimeout() {{}}
"#
        )
    }

    fn eval_to_string(&self, context: &mut Context, code: &str) -> InterpreterResult<String> {
        let value = context
            .eval(Source::from_bytes(code))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;

        value
            .to_string(context)
            .map_err(|err| InterpreterError::Execution(err.to_string()))?
            .to_std_string()
            .map_err(|_| InterpreterError::Other("unable to convert interpreter output".into()))
    }

    fn prepared_context(&self, host: &str) -> InterpreterResult<Context> {
        let mut context = Context::default();
        context
            .eval(Source::from_bytes(&self.build_prelude(host)))
            .map_err(|err| InterpreterError::Other(err.to_string()))?;
        Ok(context)
    }
}

impl JavascriptInterpreter for BoaJavascriptInterpreter {
    fn execute(&self, script: &str, host: &str) -> InterpreterResult<String> {
        let mut context = self.prepared_context(host)?;
        self.eval_to_string(&mut context, script)
    }

    fn document_cookie(&self, script: &str, host: &str) -> InterpreterResult<String> {
        let mut context = self.prepared_context(host)?;
        context
            .eval(Source::from_bytes(script))
            .map_err(|err| InterpreterError::Execution(err.to_string()))?;
        self.eval_to_string(&mut context, "document.cookie")
    }
}
