//! Deterministic enumeration of operator instances and whole recipes from
//! their option domains, by the canonical positional mixed-radix rule.
//!
//! Grounded in `original_source/fragscapy/modgenerator.py`'s
//! `ModGenerator`/`ModListGenerator`, reworked around [`OptionDomain`] and
//! the [`crate::transform::registry`] constructor table instead of Python's
//! dynamic module import.

use crate::domain::OptionDomain;
use crate::errors::TransformError;
use crate::transform::{registry, Transformation};

/// Enumerates every argument combination of a single named operator.
///
/// `len()` is the product of each domain's length; `get(i)` decomposes `i`
/// into one index per domain via `i mod |d0|`, `(i / |d0|) mod |d1|`, ...,
/// then asks the registry to build the operator from the resolved scalars.
pub struct OperatorInstanceGenerator {
    mod_name: String,
    domains: Vec<OptionDomain>,
    optional: bool,
}

impl OperatorInstanceGenerator {
    pub fn new(mod_name: impl Into<String>, domains: Vec<OptionDomain>, optional: bool) -> Self {
        OperatorInstanceGenerator {
            mod_name: mod_name.into(),
            domains,
            optional,
        }
    }

    pub fn mod_name(&self) -> &str {
        &self.mod_name
    }

    pub fn optional(&self) -> bool {
        self.optional
    }

    pub fn len(&self) -> usize {
        self.domains.iter().map(|d| d.len()).product::<usize>().max(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether every value in this generator's domain set is a singleton,
    /// i.e. the operator it builds is the same for every index.
    pub fn is_fixed(&self) -> bool {
        self.domains.iter().all(|d| d.len() == 1)
    }

    fn resolve(&self, mut i: usize) -> Result<Vec<crate::domain::Scalar>, TransformError> {
        let mut args = Vec::with_capacity(self.domains.len());
        for d in &self.domains {
            let radix = d.len();
            let digit = i % radix;
            i /= radix;
            args.push(d.get(digit)?);
        }
        Ok(args)
    }

    /// Builds the `i`-th operator instance named by this generator.
    pub fn get(&self, i: usize) -> Result<Box<dyn Transformation>, TransformError> {
        let args = self.resolve(i)?;
        match registry::construct(&self.mod_name, &args) {
            Ok(t) => Ok(t),
            Err(e) if self.optional => {
                warn!("optional operator '{}' failed to build, skipping: {}", self.mod_name, e);
                registry::construct("echo", &[crate::domain::Scalar::Str(String::new())])
            }
            Err(e) => Err(e),
        }
    }
}

/// A fully resolved, ordered sequence of transformations: one direction's
/// recipe for one index into a [`RecipeGenerator`].
pub type Recipe = Vec<Box<dyn Transformation>>;

/// The mixed-radix composition of [`OperatorInstanceGenerator`]s for one
/// direction (ingress or egress) of one configuration file.
pub struct RecipeGenerator {
    generators: Vec<OperatorInstanceGenerator>,
}

impl RecipeGenerator {
    pub fn new(generators: Vec<OperatorInstanceGenerator>) -> Self {
        RecipeGenerator { generators }
    }

    pub fn len(&self) -> usize {
        self.generators.iter().map(|g| g.len()).product::<usize>().max(1)
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Builds the `i`-th recipe, a [`Recipe`] with one operator per
    /// generator, each decomposed from `i` the same way a single
    /// generator decomposes into its own domains.
    pub fn get(&self, mut i: usize) -> Result<Recipe, TransformError> {
        let mut recipe = Vec::with_capacity(self.generators.len());
        for g in &self.generators {
            let radix = g.len();
            let digit = i % radix;
            i /= radix;
            recipe.push(g.get(digit)?);
        }
        Ok(recipe)
    }
}

/// True iff every operator instance in a concrete, already-resolved
/// [`Recipe`] is deterministic. Unlike [`OperatorInstanceGenerator::is_fixed`]
/// (a property of the whole domain), this is a property of one resolved
/// index `i` — e.g. `drop(seq_int 0 1)` is deterministic at every index even
/// though its domain has two values, because each resolved instance targets
/// a single, fixed position.
pub fn recipe_is_deterministic(recipe: &Recipe) -> bool {
    recipe.iter().all(|op| op.is_deterministic())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OptionDomain;

    #[test]
    fn single_generator_length_matches_domain_product() {
        let g = OperatorInstanceGenerator::new(
            "echo",
            vec![OptionDomain::parse("seq_str a b c").unwrap()],
            false,
        );
        assert_eq!(g.len(), 3);
    }

    #[test]
    fn recipe_generator_length_is_product_of_generators() {
        let g1 = OperatorInstanceGenerator::new("echo", vec![OptionDomain::parse("range 1").unwrap()], false);
        let g2 = OperatorInstanceGenerator::new("echo", vec![OptionDomain::parse("range 2").unwrap()], false);
        let rg = RecipeGenerator::new(vec![g1, g2]);
        assert_eq!(rg.len(), 2 * 3);
    }

    #[test]
    fn fixed_deterministic_generator_reports_deterministic_recipe() {
        let g = OperatorInstanceGenerator::new(
            "echo",
            vec![OptionDomain::parse("str hello").unwrap()],
            false,
        );
        let rg = RecipeGenerator::new(vec![g]);
        let recipe = rg.get(0).unwrap();
        assert!(recipe_is_deterministic(&recipe));
    }

    #[test]
    fn deterministic_operator_over_a_multi_value_domain_is_deterministic_per_index() {
        // drop(seq_int 0 1): two distinct, but each individually fixed, targets.
        let g = OperatorInstanceGenerator::new("drop", vec![OptionDomain::parse("seq_int 0 1").unwrap()], false);
        let rg = RecipeGenerator::new(vec![g]);
        assert_eq!(rg.len(), 2);
        for i in 0..rg.len() {
            let recipe = rg.get(i).unwrap();
            assert!(recipe_is_deterministic(&recipe));
        }
    }
}
