use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{Reference, Variable};

/// An integer-valued expression of the interface language.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expression {
    IntLiteral(i64),
    Reference(VariableReference),
}

/// A variable with a list of index expressions applied, like `A[i][j]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableReference {
    pub variable: Variable,
    pub indices: Vec<Expression>,
}

/// Something able to provide the value of a scalar cell, given the variable and the values of the
/// indices applied to it.
pub trait Scope {
    /// `None` means the value is not known (yet).
    fn lookup(&self, variable: &Variable, indices: &[i64]) -> Option<i64>;
}

impl VariableReference {
    pub fn new(variable: Variable, indices: Vec<Expression>) -> VariableReference {
        VariableReference { variable, indices }
    }

    pub fn scalar<S: Into<String>>(name: S) -> VariableReference {
        VariableReference::new(Variable::scalar(name), vec![])
    }

    pub fn reference(&self) -> Reference {
        Reference::new(self.variable.clone(), self.indices.len())
    }

    /// Evaluate the indices of this reference, `None` if some of them are not known.
    pub fn evaluate_indices<S: Scope + ?Sized>(&self, scope: &S) -> Option<Vec<i64>> {
        self.indices.iter().map(|i| i.evaluate(scope)).collect()
    }
}

impl Expression {
    pub fn int(value: i64) -> Expression {
        Expression::IntLiteral(value)
    }

    pub fn variable(variable: &Variable) -> Expression {
        Expression::Reference(VariableReference::new(variable.clone(), vec![]))
    }

    pub fn as_variable_reference(&self) -> Option<&VariableReference> {
        match self {
            Expression::Reference(r) => Some(r),
            Expression::IntLiteral(_) => None,
        }
    }

    pub fn reference(&self) -> Option<Reference> {
        self.as_variable_reference().map(|r| r.reference())
    }

    /// All the variables this expression reads, indices included.
    pub fn referenced_variables(&self) -> Vec<&Variable> {
        match self {
            Expression::IntLiteral(_) => vec![],
            Expression::Reference(r) => {
                let mut vars = vec![&r.variable];
                for index in &r.indices {
                    vars.extend(index.referenced_variables());
                }
                vars
            }
        }
    }

    pub fn evaluate<S: Scope + ?Sized>(&self, scope: &S) -> Option<i64> {
        match self {
            Expression::IntLiteral(value) => Some(*value),
            Expression::Reference(r) => {
                let indices = r.evaluate_indices(scope)?;
                scope.lookup(&r.variable, &indices)
            }
        }
    }
}

impl Display for VariableReference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.variable.name)?;
        for index in &self.indices {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::IntLiteral(value) => write!(f, "{}", value),
            Expression::Reference(r) => write!(f, "{}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    struct MapScope(HashMap<(String, Vec<i64>), i64>);

    impl Scope for MapScope {
        fn lookup(&self, variable: &Variable, indices: &[i64]) -> Option<i64> {
            self.0.get(&(variable.name.clone(), indices.to_vec())).copied()
        }
    }

    #[test]
    fn test_evaluate_nested_indices() {
        let i = Variable::scalar("i");
        let a = Variable::array("A", 1);
        let expr = Expression::Reference(VariableReference::new(
            a,
            vec![Expression::variable(&i)],
        ));
        let mut values = HashMap::new();
        values.insert(("i".to_string(), vec![]), 2);
        values.insert(("A".to_string(), vec![2]), 42);
        assert_eq!(expr.evaluate(&MapScope(values)), Some(42));
        assert_eq!(expr.to_string(), "A[i]");
    }

    #[test]
    fn test_evaluate_unbound() {
        let expr = Expression::variable(&Variable::scalar("x"));
        assert_eq!(expr.evaluate(&MapScope(HashMap::new())), None);
        assert_eq!(Expression::int(-3).evaluate(&MapScope(HashMap::new())), Some(-3));
    }
}
