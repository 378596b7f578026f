pub mod apigateway;
#[cfg(feature = "aws_dynamodb")]
pub mod dynamodb;
#[cfg(feature = "aws_ssm")]
pub mod ssm;
